//! The fallback shader patcher: it claims any shape whose diffuse or normal
//! actually exists, binding nothing new. Its matches exist so that the mod
//! owning the base textures participates in conflict resolution.

use anyhow::Result;
use parallaxgen_files::nif::{NifFile, TextureSlot};

use crate::context::PgContext;
use crate::patchers::{PatcherMatch, ShaderFactory, ShaderPatcher};
use crate::textures::{ShapeShader, TextureSet};

pub struct ShaderDefault;

impl ShaderDefault {
    pub fn factory() -> ShaderFactory {
        Box::new(|_nif_path, _nif| Box::new(ShaderDefault))
    }
}

impl ShaderPatcher for ShaderDefault {
    fn shader(&self) -> ShapeShader {
        ShapeShader::None
    }

    fn name(&self) -> &'static str {
        "Default"
    }

    fn can_apply(&self, _ctx: &PgContext, _nif: &NifFile, _shape: usize) -> bool {
        true
    }

    fn should_apply(&self, ctx: &PgContext, slots: &TextureSet) -> Vec<PatcherMatch> {
        let mut matches = Vec::new();

        for slot in [TextureSlot::Diffuse, TextureSlot::Normal] {
            let idx = u32::from(slot) as usize;
            if slots[idx].is_empty() || !ctx.vfs.is_file(&slots[idx]) {
                continue;
            }

            matches.push(PatcherMatch {
                matched_path: slots[idx].clone(),
                matched_from: [slot].into_iter().collect(),
                extra: None,
            });
        }

        matches
    }

    fn apply(
        &self,
        _ctx: &PgContext,
        _nif: &mut NifFile,
        _shape: usize,
        old_slots: &TextureSet,
        _patcher_match: &PatcherMatch,
    ) -> Result<(TextureSet, bool)> {
        Ok((old_slots.clone(), false))
    }

    fn apply_slots(&self, _ctx: &PgContext, old_slots: &TextureSet, _patcher_match: &PatcherMatch) -> TextureSet {
        old_slots.clone()
    }

    fn apply_shader(&self, _ctx: &PgContext, _nif: &mut NifFile, _shape: usize) -> Result<bool> {
        // nothing to force: the shape keeps whatever it has
        Ok(false)
    }
}
