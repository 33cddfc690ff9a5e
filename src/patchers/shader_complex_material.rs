//! Complex material: binds a CM env-mask onto slot 5, points the cubemap
//! slot at the dynamic cubemap, and carries optional per-texture JSON
//! metadata into the shader constants.

use anyhow::Result;
use parallaxgen_files::nif::{
    LightingShaderProperty, LightingShaderType, NifFile, ShaderFlags1, ShaderFlags2, TextureSlot,
};

use crate::context::PgContext;
use crate::output::DYN_CUBEMAP_PATH;
use crate::patchers::{PatcherMatch, ShaderFactory, ShaderPatcher};
use crate::textures::{self, ShapeShader, TextureAttributes, TextureSet, TextureType};
use crate::util::{self, logger};

pub struct ShaderComplexMaterial {
    nif_path: String,
}

impl ShaderComplexMaterial {
    pub fn factory() -> ShaderFactory {
        Box::new(|nif_path, _nif| {
            Box::new(ShaderComplexMaterial {
                nif_path: nif_path.to_string(),
            })
        })
    }

    /// Sidecar JSON with shader constant overrides, if the mod ships one.
    fn material_meta(ctx: &PgContext, matched_path: &str) -> Option<serde_json::Value> {
        let meta_path = util::with_extension(matched_path, "json");
        if !ctx.vfs.is_file(&meta_path) {
            return None;
        }
        let raw = ctx.vfs.read_bytes(&meta_path).ok()?;
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                logger::debug(format!("Ignoring malformed material meta {meta_path}: {err}"));
                None
            }
        }
    }

    fn apply_meta_overrides(shader: &mut LightingShaderProperty, meta: &serde_json::Value) -> bool {
        let mut changed = false;

        if let Some(enabled) = meta.get("specular_enabled").and_then(|v| v.as_bool()) {
            changed |= shader.set_flag1(ShaderFlags1::SPECULAR, enabled);
        }

        if let Some(color) = meta.get("specular_color").and_then(|v| v.as_array()) {
            if color.len() == 3 {
                for (i, component) in color.iter().enumerate() {
                    if let Some(value) = component.as_f64() {
                        changed |=
                            LightingShaderProperty::set_float(&mut shader.specular_color[i], value as f32);
                    }
                }
            }
        }

        if let Some(strength) = meta.get("specular_strength").and_then(|v| v.as_f64()) {
            changed |= LightingShaderProperty::set_float(&mut shader.specular_strength, strength as f32);
        }

        if let Some(glossiness) = meta.get("glossiness").and_then(|v| v.as_f64()) {
            changed |= LightingShaderProperty::set_float(&mut shader.glossiness, glossiness as f32);
        }

        if let Some(scale) = meta.get("environment_map_scale").and_then(|v| v.as_f64()) {
            if let Some(env_map_scale) = shader.env_map_scale.as_mut() {
                changed |= LightingShaderProperty::set_float(env_map_scale, scale as f32);
            }
        }

        changed
    }
}

impl ShaderPatcher for ShaderComplexMaterial {
    fn shader(&self) -> ShapeShader {
        ShapeShader::ComplexMaterial
    }

    fn name(&self) -> &'static str {
        "ComplexMaterial"
    }

    fn can_apply(&self, ctx: &PgContext, nif: &NifFile, shape: usize) -> bool {
        let Some(shader) = nif.shader_for_shape(shape).and_then(|b| nif.lighting_shader(b)) else {
            return false;
        };

        let type_ok = matches!(
            shader.shader_type,
            LightingShaderType::Default | LightingShaderType::EnvironmentMap | LightingShaderType::Parallax
        ) || (shader.shader_type == LightingShaderType::MultiLayerParallax && ctx.config.disable_mlp);
        if !type_ok {
            logger::trace("Shape rejected: incompatible shader type");
            return false;
        }

        let lighting = shader.flags2
            & (ShaderFlags2::SOFT_LIGHTING | ShaderFlags2::RIM_LIGHTING | ShaderFlags2::BACK_LIGHTING);
        if shader.flags2.contains(ShaderFlags2::ANISOTROPIC_LIGHTING) && !lighting.is_empty() {
            logger::trace("Shape rejected: unsupported shader permutation");
            return false;
        }
        if lighting == ShaderFlags2::SOFT_LIGHTING | ShaderFlags2::RIM_LIGHTING | ShaderFlags2::BACK_LIGHTING {
            logger::trace("Shape rejected: unsupported shader permutation");
            return false;
        }

        true
    }

    fn should_apply(&self, ctx: &PgContext, slots: &TextureSet) -> Vec<PatcherMatch> {
        let prefixes = textures::search_prefixes(slots);
        let mappings = ctx.textures.read().unwrap_or_else(|e| e.into_inner());

        let mut base_map = String::new();
        let mut found = Vec::new();
        let mut matched_from = TextureSlot::Normal;

        for slot in [TextureSlot::Normal, TextureSlot::Diffuse] {
            let idx = u32::from(slot) as usize;
            if slots[idx].is_empty() || !ctx.vfs.is_file(&slots[idx]) {
                continue;
            }

            found = mappings.matches(TextureSlot::EnvMask, &prefixes[idx], TextureType::ComplexMaterial);
            if !found.is_empty() {
                base_map = slots[idx].clone();
                matched_from = slot;
                break;
            }
        }
        drop(mappings);

        let existing = &slots[u32::from(TextureSlot::EnvMask) as usize];
        let mut matches = Vec::new();
        let mut existing_match = None;

        for candidate in found {
            if !ctx.gpu.aspect_ratios_match(&ctx.vfs, &base_map, &candidate.path) {
                continue;
            }

            let patcher_match = PatcherMatch {
                extra: Self::material_meta(ctx, &candidate.path),
                matched_from: [matched_from].into_iter().collect(),
                matched_path: candidate.path,
            };

            if patcher_match.matched_path == *existing {
                existing_match = Some(patcher_match);
            } else {
                matches.push(patcher_match);
            }
        }

        if let Some(existing_match) = existing_match {
            matches.push(existing_match);
        }
        matches
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

        let (has_metalness, has_glossiness) = {
            let mappings = ctx.textures.read().unwrap_or_else(|e| e.into_inner());
            (
                mappings.has_attribute(&patcher_match.matched_path, TextureAttributes::CM_METALNESS),
                mappings.has_attribute(&patcher_match.matched_path, TextureAttributes::CM_GLOSSINESS),
            )
        };

        if let Some(shader) = nif.shader_for_shape(shape).and_then(|b| nif.lighting_shader_mut(b)) {
            if has_metalness {
                logger::trace("Setting specular to white because CM has metalness");
                for component in 0..3 {
                    changed |= LightingShaderProperty::set_float(&mut shader.specular_color[component], 1.0);
                }
            }
            if has_glossiness {
                changed |= shader.set_flag1(ShaderFlags1::SPECULAR, true);
            }

            if let Some(meta) = &patcher_match.extra {
                changed |= Self::apply_meta_overrides(shader, meta);
            }
        }

        let new_slots = self.apply_slots(ctx, old_slots, patcher_match);
        for (i, slot) in TextureSlot::ALL.iter().enumerate() {
            changed |= nif.set_texture_slot(shape, *slot, &new_slots[i])?;
        }

        Ok((new_slots, changed))
    }

    fn apply_slots(&self, ctx: &PgContext, old_slots: &TextureSet, patcher_match: &PatcherMatch) -> TextureSet {
        let mut new_slots = old_slots.clone();
        new_slots[u32::from(TextureSlot::Parallax) as usize] = String::new();
        new_slots[u32::from(TextureSlot::EnvMask) as usize] = patcher_match.matched_path.clone();

        let mut enable_dyn_cubemap = !(util::glob_match_any(&self.nif_path, &ctx.config.dyn_cubemap_blocklist)
            || util::glob_match_any(&patcher_match.matched_path, &ctx.config.dyn_cubemap_blocklist));

        if let Some(meta) = &patcher_match.extra {
            if let Some(flag) = meta.get("dynamic_cubemap").and_then(|v| v.as_bool()) {
                enable_dyn_cubemap = flag;
            }
        }

        if enable_dyn_cubemap {
            new_slots[u32::from(TextureSlot::Cubemap) as usize] = DYN_CUBEMAP_PATH.to_string();
        }

        new_slots
    }

    fn apply_shader(&self, ctx: &PgContext, nif: &mut NifFile, shape: usize) -> Result<bool> {
        let mut changed = false;

        let is_mlp = nif
            .shader_for_shape(shape)
            .and_then(|b| nif.lighting_shader(b))
            .map(|s| s.shader_type == LightingShaderType::MultiLayerParallax)
            .unwrap_or(false);

        if ctx.config.disable_mlp && is_mlp {
            changed |= nif.set_texture_slot(shape, TextureSlot::Glow, "")?;
            changed |= nif.set_texture_slot(shape, TextureSlot::MultiLayer, "")?;
            changed |= nif.set_texture_slot(shape, TextureSlot::Backlight, "")?;
        }

        let Some(shader) = nif.shader_for_shape(shape).and_then(|b| nif.lighting_shader_mut(b)) else {
            return Ok(changed);
        };

        if ctx.config.disable_mlp && is_mlp {
            changed |= shader.set_flag2(ShaderFlags2::MULTI_LAYER_PARALLAX, false);
        }

        changed |= shader.set_shader_type(LightingShaderType::EnvironmentMap);
        changed |= shader.set_flag1(ShaderFlags1::PARALLAX, false);
        changed |= shader.set_flag2(ShaderFlags2::UNUSED01, false);
        changed |= shader.set_flag1(ShaderFlags1::ENVIRONMENT_MAPPING, true);

        Ok(changed)
    }
}
