//! Texture hooks: derived-texture generation scheduled by shader transforms
//! and post patchers. Generation is deduplicated per output path; the first
//! caller does the GPU work and registers the file, later callers see it as
//! already generated.

use std::sync::Mutex;

use parallaxgen_files::dds::writer::DdsWriter;
use parallaxgen_files::dds::AlphaMode;
use parallaxgen_files::nif::TextureSlot;

use crate::context::PgContext;
use crate::gpu::{ComputeKernel, KernelParams};
use crate::textures::{self, TextureAttributes, TextureType};
use crate::util::logger;

/// Serializes the check-generate-register sequence so two shapes wanting
/// the same derived texture cannot race.
static GENERATED_FILE_TRACKER: Mutex<()> = Mutex::new(());

/// Runs a heightmap through the parallax-to-CM kernel, producing
/// `<base>_m.dds` with the height in the alpha channel. Returns the new
/// canonical path, or None when generation failed.
pub fn convert_to_cm(ctx: &PgContext, height_path: &str) -> Option<String> {
    let base = textures::tex_base(height_path, Some(TextureSlot::Parallax));
    let out_path = format!("{base}_m.dds");

    generate(
        ctx,
        height_path,
        &out_path,
        ComputeKernel::ParallaxToCm,
        &KernelParams::default(),
        AlphaMode::Straight,
        TextureSlot::EnvMask,
        TextureType::ComplexMaterial,
        TextureAttributes::CM_HEIGHT,
    )
}

/// Produces the `<base>_s.dds` subsurface map for a diffuse.
pub fn fix_sss(ctx: &PgContext, diffuse_path: &str) -> Option<String> {
    let base = textures::tex_base(diffuse_path, Some(TextureSlot::Diffuse));
    let out_path = format!("{base}_s.dds");

    let params = KernelParams {
        albedo_sat_power: 1.5,
        albedo_norm: 0.8,
        ..Default::default()
    };

    generate(
        ctx,
        diffuse_path,
        &out_path,
        ComputeKernel::SssFix,
        &params,
        AlphaMode::Straight,
        TextureSlot::Glow,
        TextureType::SubsurfaceColor,
        TextureAttributes::empty(),
    )
}

#[allow(clippy::too_many_arguments)]
fn generate(
    ctx: &PgContext,
    src_path: &str,
    out_path: &str,
    kernel: ComputeKernel,
    params: &KernelParams,
    alpha_mode: AlphaMode,
    slot: TextureSlot,
    ttype: TextureType,
    attributes: TextureAttributes,
) -> Option<String> {
    if ctx.vfs.is_generated(out_path) {
        return Some(out_path.to_string());
    }

    let (_, image) = ctx.gpu.load_dds(&ctx.vfs, src_path)?;
    let mips = ctx.gpu.apply_shader(&image, kernel, params)?;

    let _tracker = GENERATED_FILE_TRACKER.lock().unwrap_or_else(|e| e.into_inner());
    if ctx.vfs.is_generated(out_path) {
        return Some(out_path.to_string());
    }

    let bytes = match DdsWriter::write_rgba8(&mips, alpha_mode) {
        Ok(bytes) => bytes,
        Err(err) => {
            logger::error(format!("Failed to encode generated texture {out_path}: {err}"));
            return None;
        }
    };
    if let Err(err) = ctx.output.write_file(out_path, &bytes) {
        logger::error(format!("Failed to write generated texture {out_path}: {err}"));
        return None;
    }

    let owning_mod = ctx.mod_for(src_path);
    if let Err(err) = ctx.vfs.add_generated(out_path, owning_mod) {
        logger::error(format!("Failed to register generated texture: {err}"));
        return None;
    }

    // make the derived texture visible to cascading patchers
    let mut mappings = ctx.textures.write().unwrap_or_else(|e| e.into_inner());
    mappings.insert(slot, out_path, ttype, attributes);

    logger::debug(format!("Generated {out_path} from {src_path}"));
    Some(out_path.to_string())
}
