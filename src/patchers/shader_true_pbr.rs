//! True PBR: JSON-config-driven rebinding of diffuse/normal pairs onto the
//! community PBR texture stack under `textures\pbr\`, marked on the shape
//! with the repurposed UNUSED01 flag.

use anyhow::Result;
use parallaxgen_files::nif::{LightingShaderType, NifFile, ShaderFlags1, ShaderFlags2, TextureSlot};
use serde::{Deserialize, Serialize};

use crate::context::PgContext;
use crate::patchers::{PatcherMatch, ShaderFactory, ShaderPatcher};
use crate::textures::{self, ShapeShader, TextureSet};
use crate::util::logger;
use crate::vfs::Vfs;

pub const PBR_CONFIG_DIR: &str = "pbrnifpatcher\\";
pub const PBR_TEXTURE_PREFIX: &str = "textures\\pbr\\";
const TEXTURE_PREFIX: &str = "textures\\";

/// One entry of a PBR patcher config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PbrConfig {
    /// Suffix match against the diffuse base path (without extension).
    pub match_diffuse: Option<String>,
    /// Suffix match against the normal base path (without extension).
    pub match_normal: Option<String>,
    /// Substring filter on the mesh path.
    pub nif_filter: Option<String>,
    /// Replaces the matched tail of the base path before prefixing.
    pub rename: Option<String>,
    /// Entry suppresses PBR for its matches instead of enabling it.
    pub delete: bool,
    pub specular_level: Option<f32>,
    pub subsurface_color: Option<[f32; 3]>,
}

/// Loads every config under `pbrnifpatcher\`; files hold one entry or an
/// array of entries.
pub fn load_configs(vfs: &Vfs) -> Vec<PbrConfig> {
    let mut configs = Vec::new();
    for path in vfs.files_with(PBR_CONFIG_DIR, ".json") {
        let Ok(raw) = vfs.read_bytes(&path) else {
            logger::error(format!("Failed to read PBR config {path}"));
            continue;
        };

        match serde_json::from_slice::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::Array(entries)) => {
                for entry in entries {
                    match serde_json::from_value::<PbrConfig>(entry) {
                        Ok(config) => configs.push(config),
                        Err(err) => logger::error(format!("Bad PBR config entry in {path}: {err}")),
                    }
                }
            }
            Ok(entry) => match serde_json::from_value::<PbrConfig>(entry) {
                Ok(config) => configs.push(config),
                Err(err) => logger::error(format!("Bad PBR config in {path}: {err}")),
            },
            Err(err) => logger::error(format!("PBR config {path} is not valid JSON: {err}")),
        }
    }

    logger::info(format!("Loaded {} PBR patcher config entries", configs.len()));
    configs
}

pub struct ShaderTruePbr {
    nif_path: String,
}

impl ShaderTruePbr {
    pub fn factory() -> ShaderFactory {
        Box::new(|nif_path, _nif| {
            Box::new(ShaderTruePbr {
                nif_path: nif_path.to_string(),
            })
        })
    }

    /// `textures\x\y` -> `textures\pbr\x\y`, with the config's rename
    /// applied to the matched tail.
    fn pbr_base(base: &str, matched_suffix: &str, config: &PbrConfig) -> String {
        let renamed = match &config.rename {
            Some(rename) if base.len() >= matched_suffix.len() => {
                format!("{}{}", &base[..base.len() - matched_suffix.len()], rename)
            }
            _ => base.to_string(),
        };

        match renamed.strip_prefix(TEXTURE_PREFIX) {
            Some(rest) => format!("{PBR_TEXTURE_PREFIX}{rest}"),
            None => format!("{PBR_TEXTURE_PREFIX}{renamed}"),
        }
    }

    fn config_for(&self, ctx: &PgContext, slots: &TextureSet) -> Option<(PbrConfig, TextureSlot, String)> {
        let prefixes = textures::search_prefixes(slots);

        for config in &ctx.pbr_configs {
            if let Some(filter) = &config.nif_filter {
                if !self.nif_path.contains(filter.to_lowercase().as_str()) {
                    continue;
                }
            }

            let candidates = [
                (TextureSlot::Diffuse, config.match_diffuse.as_ref()),
                (TextureSlot::Normal, config.match_normal.as_ref()),
            ];

            for (slot, matcher) in candidates {
                let Some(matcher) = matcher else {
                    continue;
                };
                let idx = u32::from(slot) as usize;
                if prefixes[idx].is_empty() {
                    continue;
                }
                let matcher = matcher.to_lowercase();
                if prefixes[idx].ends_with(&matcher) {
                    return Some((config.clone(), slot, matcher));
                }
            }
        }

        None
    }
}

impl ShaderPatcher for ShaderTruePbr {
    fn shader(&self) -> ShapeShader {
        ShapeShader::TruePbr
    }

    fn name(&self) -> &'static str {
        "TruePBR"
    }

    fn can_apply(&self, _ctx: &PgContext, nif: &NifFile, shape: usize) -> bool {
        let Some(shader) = nif.shader_for_shape(shape).and_then(|b| nif.lighting_shader(b)) else {
            return false;
        };
        // facegen tint meshes keep their specialized pipeline
        !shader.flags1.contains(ShaderFlags1::FACEGEN_RGB_TINT)
    }

    fn should_apply(&self, ctx: &PgContext, slots: &TextureSet) -> Vec<PatcherMatch> {
        let Some((config, slot, matched_suffix)) = self.config_for(ctx, slots) else {
            return Vec::new();
        };

        if config.delete {
            logger::trace("PBR config suppresses this match");
            return Vec::new();
        }

        let idx = u32::from(slot) as usize;
        let base = textures::tex_base(&slots[idx], Some(slot));
        let pbr_base = Self::pbr_base(&base, &matched_suffix, &config);

        // the rebind needs at least the PBR diffuse to exist
        let diffuse = format!("{pbr_base}.dds");
        if !ctx.vfs.is_file(&diffuse) {
            logger::trace(format!("Rejecting: PBR diffuse missing: {diffuse}"));
            return Vec::new();
        }

        let mut extra = serde_json::to_value(&config).unwrap_or_default();
        if let Some(object) = extra.as_object_mut() {
            object.insert("pbr_base".to_string(), serde_json::Value::from(pbr_base));
        }

        vec![PatcherMatch {
            matched_path: diffuse,
            matched_from: [slot].into_iter().collect(),
            extra: Some(extra),
        }]
    }

    fn apply(
        &self,
        ctx: &PgContext,
        nif: &mut NifFile,
        shape: usize,
        old_slots: &TextureSet,
        patcher_match: &PatcherMatch,
    ) -> Result<(TextureSet, bool)> {
        let mut changed = self.apply_shader(ctx, nif, shape)?;

        if let Some(level) = patcher_match
            .extra
            .as_ref()
            .and_then(|e| e.get("specular_level"))
            .and_then(|v| v.as_f64())
        {
            if let Some(shader) = nif.shader_for_shape(shape).and_then(|b| nif.lighting_shader_mut(b)) {
                changed |= parallaxgen_files::nif::LightingShaderProperty::set_float(
                    &mut shader.specular_strength,
                    level as f32,
                );
            }
        }

        let new_slots = self.apply_slots(ctx, old_slots, patcher_match);
        for (i, slot) in TextureSlot::ALL.iter().enumerate() {
            changed |= nif.set_texture_slot(shape, *slot, &new_slots[i])?;
        }

        Ok((new_slots, changed))
    }

    fn apply_slots(&self, ctx: &PgContext, old_slots: &TextureSet, patcher_match: &PatcherMatch) -> TextureSet {
        let pbr_base = patcher_match
            .extra
            .as_ref()
            .and_then(|e| e.get("pbr_base"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| textures::tex_base(&patcher_match.matched_path, Some(TextureSlot::Diffuse)));

        let existing_or_empty = |suffix: &str| -> String {
            let candidate = format!("{pbr_base}{suffix}.dds");
            if ctx.vfs.is_file(&candidate) {
                candidate
            } else {
                String::new()
            }
        };

        let mut new_slots = old_slots.clone();
        new_slots[u32::from(TextureSlot::Diffuse) as usize] = format!("{pbr_base}.dds");
        new_slots[u32::from(TextureSlot::Normal) as usize] = format!("{pbr_base}_n.dds");
        new_slots[u32::from(TextureSlot::Glow) as usize] = existing_or_empty("_g");
        new_slots[u32::from(TextureSlot::Parallax) as usize] = existing_or_empty("_p");
        new_slots[u32::from(TextureSlot::Cubemap) as usize] = String::new();
        new_slots[u32::from(TextureSlot::EnvMask) as usize] = existing_or_empty("_rmaos");
        let coat = existing_or_empty("_cnr");
        new_slots[u32::from(TextureSlot::MultiLayer) as usize] = if coat.is_empty() {
            existing_or_empty("_s")
        } else {
            coat
        };
        new_slots[u32::from(TextureSlot::Backlight) as usize] = existing_or_empty("_b");
        new_slots
    }

    fn apply_shader(&self, _ctx: &PgContext, nif: &mut NifFile, shape: usize) -> Result<bool> {
        let Some(shader) = nif.shader_for_shape(shape).and_then(|b| nif.lighting_shader_mut(b)) else {
            return Ok(false);
        };

        let mut changed = shader.set_shader_type(LightingShaderType::Default);
        changed |= shader.set_flag1(ShaderFlags1::ENVIRONMENT_MAPPING, false);
        changed |= shader.set_flag1(ShaderFlags1::PARALLAX, false);
        changed |= shader.set_flag2(ShaderFlags2::MULTI_LAYER_PARALLAX, false);
        // the community PBR marker
        changed |= shader.set_flag2(ShaderFlags2::UNUSED01, true);

        Ok(changed)
    }
}
