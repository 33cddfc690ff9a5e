//! Safety net after shader selection: a shape left pointing at a parallax
//! or env-map shader whose required textures do not exist is put back on
//! the default shader so the game does not sample garbage.

use anyhow::Result;
use parallaxgen_files::nif::{LightingShaderType, NifFile, ShaderFlags1, TextureSlot};

use crate::context::PgContext;
use crate::patchers::{PostMeshFactory, PostMeshPatcher};
use crate::util::logger;

pub struct PostRestoreDefaultShaders;

impl PostRestoreDefaultShaders {
    pub fn factory() -> PostMeshFactory {
        Box::new(|_nif_path, _nif| Box::new(PostRestoreDefaultShaders))
    }

    fn restore_from_parallax(ctx: &PgContext, nif: &mut NifFile, shape: usize) -> Result<bool> {
        let Some(shader_block) = nif.shader_for_shape(shape) else {
            return Ok(false);
        };
        let is_parallax = nif
            .lighting_shader(shader_block)
            .map(|s| s.shader_type == LightingShaderType::Parallax)
            .unwrap_or(false);
        if !is_parallax {
            return Ok(false);
        }

        let slots = nif.texture_slots(shape);
        let height = &slots[u32::from(TextureSlot::Parallax) as usize];
        if !height.is_empty() && ctx.vfs.is_file(height) {
            return Ok(false);
        }

        logger::debug("Restoring default shader: parallax heightmap missing");
        if let Some(shader) = nif.lighting_shader_mut(shader_block) {
            shader.set_shader_type(LightingShaderType::Default);
            shader.set_flag1(ShaderFlags1::PARALLAX, false);
        }
        nif.set_texture_slot(shape, TextureSlot::Parallax, "")?;
        Ok(true)
    }

    fn restore_from_env_map(ctx: &PgContext, nif: &mut NifFile, shape: usize) -> Result<bool> {
        let Some(shader_block) = nif.shader_for_shape(shape) else {
            return Ok(false);
        };
        let is_env_map = nif
            .lighting_shader(shader_block)
            .map(|s| s.shader_type == LightingShaderType::EnvironmentMap)
            .unwrap_or(false);
        if !is_env_map {
            return Ok(false);
        }

        let slots = nif.texture_slots(shape);
        let cubemap = &slots[u32::from(TextureSlot::Cubemap) as usize];
        let env_mask = &slots[u32::from(TextureSlot::EnvMask) as usize];

        let cubemap_ok = !cubemap.is_empty() && ctx.vfs.is_file(cubemap);
        let env_mask_ok = env_mask.is_empty() || ctx.vfs.is_file(env_mask);
        if cubemap_ok && env_mask_ok {
            return Ok(false);
        }

        logger::debug("Restoring default shader: env map textures missing");
        if let Some(shader) = nif.lighting_shader_mut(shader_block) {
            shader.set_shader_type(LightingShaderType::Default);
            shader.set_flag1(ShaderFlags1::ENVIRONMENT_MAPPING, false);
        }
        nif.set_texture_slot(shape, TextureSlot::Cubemap, "")?;
        nif.set_texture_slot(shape, TextureSlot::EnvMask, "")?;
        Ok(true)
    }
}

impl PostMeshPatcher for PostRestoreDefaultShaders {
    fn name(&self) -> &'static str {
        "RestoreDefaultShaders"
    }

    fn apply(&self, ctx: &PgContext, nif: &mut NifFile, shape: usize) -> Result<bool> {
        if Self::restore_from_parallax(ctx, nif, shape)? {
            return Ok(true);
        }
        Self::restore_from_env_map(ctx, nif, shape)
    }
}
