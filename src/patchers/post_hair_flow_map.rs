//! Installs a hair flow map on hair-tint shapes whose normal map has a
//! matching `_flow` texture.

use anyhow::Result;
use parallaxgen_files::nif::{LightingShaderType, NifFile, ShaderFlags2, TextureSlot};

use crate::context::PgContext;
use crate::patchers::{PostMeshFactory, PostMeshPatcher};
use crate::textures::{self, TextureType};

pub struct PostHairFlowMap;

impl PostHairFlowMap {
    pub fn factory() -> PostMeshFactory {
        Box::new(|_nif_path, _nif| Box::new(PostHairFlowMap))
    }
}

impl PostMeshPatcher for PostHairFlowMap {
    fn name(&self) -> &'static str {
        "HairFlowMap"
    }

    fn apply(&self, ctx: &PgContext, nif: &mut NifFile, shape: usize) -> Result<bool> {
        let Some(shader_block) = nif.shader_for_shape(shape) else {
            return Ok(false);
        };
        let Some(shader) = nif.lighting_shader(shader_block) else {
            return Ok(false);
        };

        if shader.shader_type != LightingShaderType::HairTint {
            return Ok(false);
        }
        if shader.flags2.contains(ShaderFlags2::BACK_LIGHTING) {
            // already backlit, leave it alone
            return Ok(false);
        }

        let slots = nif.texture_slots(shape);
        let normal = &slots[u32::from(TextureSlot::Normal) as usize];
        if normal.is_empty() || !ctx.vfs.is_file(normal) {
            return Ok(false);
        }

        let base = textures::tex_base(normal, Some(TextureSlot::Normal));
        let found = {
            let mappings = ctx.textures.read().unwrap_or_else(|e| e.into_inner());
            mappings.matches(TextureSlot::Backlight, &base, TextureType::HairFlowMap)
        };
        let Some(flow_map) = found.first() else {
            return Ok(false);
        };

        let mut changed = nif.set_texture_slot(shape, TextureSlot::Backlight, &flow_map.path)?;
        if let Some(shader) = nif.lighting_shader_mut(shader_block) {
            changed |= shader.set_flag2(ShaderFlags2::BACK_LIGHTING, true);
        }
        Ok(changed)
    }
}
