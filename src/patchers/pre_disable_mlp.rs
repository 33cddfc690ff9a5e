//! Rewrites MultiLayerParallax shapes to the default shader before shader
//! selection, blanking the MLP-only slots. Registered only when the user
//! opted in.

use anyhow::Result;
use parallaxgen_files::nif::{LightingShaderType, NifFile, ShaderFlags2, TextureSlot};

use crate::context::PgContext;
use crate::patchers::{PreMeshFactory, PreMeshPatcher};

pub struct PreDisableMlp;

impl PreDisableMlp {
    pub fn factory() -> PreMeshFactory {
        Box::new(|_nif_path, _nif| Box::new(PreDisableMlp))
    }
}

impl PreMeshPatcher for PreDisableMlp {
    fn name(&self) -> &'static str {
        "DisableMLP"
    }

    fn apply(&self, _ctx: &PgContext, nif: &mut NifFile, shape: usize) -> Result<bool> {
        let is_mlp = nif
            .shader_for_shape(shape)
            .and_then(|b| nif.lighting_shader(b))
            .map(|s| s.shader_type == LightingShaderType::MultiLayerParallax)
            .unwrap_or(false);
        if !is_mlp {
            return Ok(false);
        }

        for slot in [
            TextureSlot::Glow,
            TextureSlot::MultiLayer,
            TextureSlot::Cubemap,
            TextureSlot::EnvMask,
            TextureSlot::Backlight,
        ] {
            nif.set_texture_slot(shape, slot, "")?;
        }

        if let Some(shader) = nif.shader_for_shape(shape).and_then(|b| nif.lighting_shader_mut(b)) {
            shader.set_shader_type(LightingShaderType::Default);
            shader.set_flag2(ShaderFlags2::MULTI_LAYER_PARALLAX, false);
        }

        Ok(true)
    }
}
