use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::modmanager::ModManagerType;
use crate::textures::TextureType;

#[derive(Parser, Debug)]
#[command(name = "ParallaxGen")]
#[command(version)]
#[command(about = "A dynamic mesh and texture patcher for Bethesda games")]
pub struct CliArgs {
    /// -v for debug, -vv for trace
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Skip the launcher UI and start patching immediately
    #[arg(long)]
    pub autostart: bool,

    #[arg(long, env = "PARALLAXGEN_DATA_DIR")]
    pub data_dir: PathBuf,

    #[arg(long, env = "PARALLAXGEN_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// JSON config with patcher options; defaults apply when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "none")]
    pub mod_manager: ModManagerType,

    /// MO2 instance directory (the one holding modorganizer.ini)
    #[arg(long)]
    pub mo2_instance_dir: Option<PathBuf>,

    #[arg(long, default_value = "Default")]
    pub mo2_profile: String,

    /// Directory holding vortex.deployment.json (usually the data dir)
    #[arg(long)]
    pub vortex_deployment_dir: Option<PathBuf>,

    /// Skip reading BSA archives
    #[arg(long)]
    pub no_archives: bool,

    /// Run single threaded (debugging aid)
    #[arg(long)]
    pub no_multithread: bool,

    /// Disable the persistent mtime caches
    #[arg(long)]
    pub no_cache: bool,

    /// Retain parsed meshes in memory between the scan and patch phases
    #[arg(long)]
    pub high_mem: bool,

    /// Write the hierarchical diagnostics JSON
    #[arg(long)]
    pub diagnostics: bool,

    /// Zip the output tree when done
    #[arg(long)]
    pub zip_output: bool,

    /// Flag the generated plugin as an ESM
    #[arg(long)]
    pub esmify: bool,
}

impl CliArgs {
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_luminance_mult() -> f32 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HdrOptions {
    pub enabled: bool,
    #[serde(default = "default_luminance_mult")]
    pub luminance_mult: f32,
}

impl Default for HdrOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            luminance_mult: 1.0,
        }
    }
}

/// Patcher options beyond the CLI surface, serialized as JSON next to the
/// executable or passed via `--config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatcherConfig {
    /// When non-empty, only meshes matching one of these globs are patched.
    pub nif_allowlist: Vec<String>,
    pub nif_blocklist: Vec<String>,
    /// Meshes/textures that must not receive the dynamic cubemap.
    pub dyn_cubemap_blocklist: Vec<String>,
    /// Explicit role overrides: canonical texture path -> role.
    pub manual_texture_maps: HashMap<String, TextureType>,
    /// Archives whose textures must never be promoted to parallax sources.
    pub vanilla_bsa_list: Vec<String>,

    #[serde(default = "default_true")]
    pub shader_vanilla_parallax: bool,
    #[serde(default = "default_true")]
    pub shader_complex_material: bool,
    #[serde(default = "default_true")]
    pub shader_true_pbr: bool,
    /// Upgrade vanilla parallax matches to complex material by generating
    /// the env-mask on the GPU.
    pub upgrade_parallax_to_cm: bool,

    /// Rewrite MultiLayerParallax shapes to the default shader.
    pub disable_mlp: bool,
    #[serde(default = "default_true")]
    pub fix_effect_lighting: bool,
    #[serde(default = "default_true")]
    pub hair_flow_map: bool,
    pub fix_subsurface_scattering: bool,
    pub hdr: HdrOptions,

    /// Promote the mod manager's order to patch priority without asking.
    #[serde(default = "default_true")]
    pub use_mm_order: bool,
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self {
            nif_allowlist: Vec::new(),
            nif_blocklist: Vec::new(),
            dyn_cubemap_blocklist: Vec::new(),
            manual_texture_maps: HashMap::new(),
            vanilla_bsa_list: Vec::new(),
            shader_vanilla_parallax: true,
            shader_complex_material: true,
            shader_true_pbr: true,
            upgrade_parallax_to_cm: false,
            disable_mlp: false,
            fix_effect_lighting: true,
            hair_flow_map: true,
            fix_subsurface_scattering: false,
            hdr: HdrOptions::default(),
            use_mm_order: true,
        }
    }
}

impl PatcherConfig {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("config {} is not valid JSON", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_sensible() {
        let config: PatcherConfig = serde_json::from_str("{}").unwrap();
        assert!(config.shader_vanilla_parallax);
        assert!(config.shader_complex_material);
        assert!(!config.upgrade_parallax_to_cm);
        assert!(config.use_mm_order);
    }

    #[test]
    fn partial_config_overrides() {
        let config: PatcherConfig = serde_json::from_str(
            r#"{
                "upgrade_parallax_to_cm": true,
                "vanilla_bsa_list": ["Skyrim - Textures.bsa"],
                "manual_texture_maps": {"textures\\odd.dds": "complex_material"},
                "hdr": {"enabled": true, "luminance_mult": 1.5}
            }"#,
        )
        .unwrap();

        assert!(config.upgrade_parallax_to_cm);
        assert_eq!(config.vanilla_bsa_list.len(), 1);
        assert_eq!(
            config.manual_texture_maps.get("textures\\odd.dds"),
            Some(&TextureType::ComplexMaterial)
        );
        assert!(config.hdr.enabled);
        assert!((config.hdr.luminance_mult - 1.5).abs() < f32::EPSILON);
    }
}
