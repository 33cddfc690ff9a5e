//! Global texture patcher: rescales classified skin-tint and subsurface
//! textures into an HDR-friendly range during the texture patch phase.

use anyhow::Result;
use parallaxgen_files::dds::writer::DdsWriter;
use parallaxgen_files::dds::AlphaMode;

use crate::context::PgContext;
use crate::gpu::{ComputeKernel, KernelParams};
use crate::patchers::TexturePatcher;
use crate::textures::TextureType;

pub struct TextureConvertToHdr;

impl TexturePatcher for TextureConvertToHdr {
    fn name(&self) -> &'static str {
        "ConvertToHDR"
    }

    fn applies_to(&self, ctx: &PgContext, canonical_path: &str) -> bool {
        if !ctx.config.hdr.enabled {
            return false;
        }

        let mappings = ctx.textures.read().unwrap_or_else(|e| e.into_inner());
        matches!(
            mappings.texture_type(canonical_path),
            TextureType::SkinTint | TextureType::SubsurfaceColor
        )
    }

    fn apply(&self, ctx: &PgContext, canonical_path: &str) -> Result<Option<Vec<u8>>> {
        let Some((_, image)) = ctx.gpu.load_dds(&ctx.vfs, canonical_path) else {
            return Ok(None);
        };

        let params = KernelParams {
            luminance_mult: ctx.config.hdr.luminance_mult,
            ..Default::default()
        };
        let Some(mips) = ctx.gpu.apply_shader(&image, ComputeKernel::ConvertToHdr, &params) else {
            return Ok(None);
        };

        Ok(Some(DdsWriter::write_rgba8(&mips, AlphaMode::Straight)?))
    }
}
