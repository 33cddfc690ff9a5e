//! Upgrades a vanilla parallax match into a complex-material match by
//! generating the env-mask from the heightmap.

use anyhow::{anyhow, Result};

use crate::context::PgContext;
use crate::patchers::{hooks, PatcherMatch, ShaderTransformPatcher, TransformFactory};
use crate::textures::ShapeShader;

pub struct TransformParallaxToCm;

impl TransformParallaxToCm {
    pub fn factory() -> TransformFactory {
        Box::new(|_nif_path, _nif| Box::new(TransformParallaxToCm))
    }
}

impl ShaderTransformPatcher for TransformParallaxToCm {
    fn name(&self) -> &'static str {
        "UpgradeParallaxToCM"
    }

    fn from_shader(&self) -> ShapeShader {
        ShapeShader::VanillaParallax
    }

    fn to_shader(&self) -> ShapeShader {
        ShapeShader::ComplexMaterial
    }

    fn transform(&self, ctx: &PgContext, from_match: &PatcherMatch) -> Result<PatcherMatch> {
        let height_path = &from_match.matched_path;
        let new_path = hooks::convert_to_cm(ctx, height_path)
            .ok_or_else(|| anyhow!("failed to generate complex material from {height_path}"))?;

        let mut result = from_match.clone();
        result.matched_path = new_path;
        Ok(result)
    }
}
