//! Vanilla parallax: binds a `_p` heightmap onto slot 3 and switches the
//! shape to the Parallax shader type.

use anyhow::Result;
use parallaxgen_files::nif::{LightingShaderType, NifFile, ShaderFlags1, ShaderFlags2, TextureSlot};

use crate::context::PgContext;
use crate::patchers::{PatcherMatch, ShaderFactory, ShaderPatcher};
use crate::textures::{self, ShapeShader, TextureSet, TextureType};
use crate::util::logger;

pub struct ShaderVanillaParallax {
    /// Meshes with attached havok animations crash with vanilla parallax.
    has_attached_havok: bool,
}

impl ShaderVanillaParallax {
    pub fn factory() -> ShaderFactory {
        Box::new(|_nif_path, nif| {
            let has_attached_havok = nif
                .blocks
                .iter()
                .any(|b| b.type_name == "BSBehaviorGraphExtraData");
            Box::new(ShaderVanillaParallax { has_attached_havok })
        })
    }

    /// Shared diffuse/normal-driven lookup: normal first, then diffuse, the
    /// match equal to the current slot value ordered last so replacement
    /// candidates are preferred.
    pub fn find_height_matches(ctx: &PgContext, slots: &TextureSet) -> Vec<PatcherMatch> {
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

            found = mappings.matches(TextureSlot::Parallax, &prefixes[idx], TextureType::Height);
            if !found.is_empty() {
                base_map = slots[idx].clone();
                matched_from = slot;
                break;
            }
        }

        let existing = &slots[u32::from(TextureSlot::Parallax) as usize];
        let mut matches = Vec::new();
        let mut existing_match = None;

        for candidate in found {
            if !ctx.gpu.aspect_ratios_match(&ctx.vfs, &base_map, &candidate.path) {
                logger::trace(format!("Rejecting {}: aspect ratio differs from {base_map}", candidate.path));
                continue;
            }

            let patcher_match = PatcherMatch {
                matched_path: candidate.path,
                matched_from: [matched_from].into_iter().collect(),
                extra: None,
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
}

impl ShaderPatcher for ShaderVanillaParallax {
    fn shader(&self) -> ShapeShader {
        ShapeShader::VanillaParallax
    }

    fn name(&self) -> &'static str {
        "VanillaParallax"
    }

    fn can_apply(&self, _ctx: &PgContext, nif: &NifFile, shape: usize) -> bool {
        if self.has_attached_havok {
            logger::trace("Cannot apply: attached havok animations");
            return false;
        }

        let Some(tri_shape) = nif.tri_shape(shape) else {
            return false;
        };
        if tri_shape.is_skinned() {
            logger::trace("Cannot apply: skinned mesh");
            return false;
        }

        let Some(shader) = nif.shader_for_shape(shape).and_then(|b| nif.lighting_shader(b)) else {
            return false;
        };

        if !matches!(
            shader.shader_type,
            LightingShaderType::Default | LightingShaderType::Parallax | LightingShaderType::EnvironmentMap
        ) {
            logger::trace("Cannot apply: incompatible shader type");
            return false;
        }

        // decals and mesh lighting break with vanilla parallax
        if shader.flags1.intersects(ShaderFlags1::DECAL | ShaderFlags1::DYNAMIC_DECAL) {
            logger::trace("Cannot apply: shape has decal");
            return false;
        }
        if shader
            .flags2
            .intersects(ShaderFlags2::SOFT_LIGHTING | ShaderFlags2::RIM_LIGHTING | ShaderFlags2::BACK_LIGHTING)
        {
            logger::trace("Cannot apply: lighting on shape");
            return false;
        }

        true
    }

    fn should_apply(&self, ctx: &PgContext, slots: &TextureSet) -> Vec<PatcherMatch> {
        Self::find_height_matches(ctx, slots)
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

        let new_slots = self.apply_slots(ctx, old_slots, patcher_match);
        for (i, slot) in parallaxgen_files::nif::TextureSlot::ALL.iter().enumerate() {
            changed |= nif.set_texture_slot(shape, *slot, &new_slots[i])?;
        }

        Ok((new_slots, changed))
    }

    fn apply_slots(&self, _ctx: &PgContext, old_slots: &TextureSet, patcher_match: &PatcherMatch) -> TextureSet {
        let mut new_slots = old_slots.clone();
        new_slots[u32::from(TextureSlot::Parallax) as usize] = patcher_match.matched_path.clone();
        new_slots
    }

    fn apply_shader(&self, _ctx: &PgContext, nif: &mut NifFile, shape: usize) -> Result<bool> {
        let Some(shader_block) = nif.shader_for_shape(shape) else {
            return Ok(false);
        };
        let Some(shader) = nif.lighting_shader_mut(shader_block) else {
            return Ok(false);
        };

        let mut changed = shader.set_shader_type(LightingShaderType::Parallax);
        changed |= shader.set_flag1(ShaderFlags1::ENVIRONMENT_MAPPING, false);
        changed |= shader.set_flag2(ShaderFlags2::MULTI_LAYER_PARALLAX, false);
        changed |= shader.set_flag2(ShaderFlags2::UNUSED01, false);
        changed |= shader.set_flag1(ShaderFlags1::PARALLAX, true);
        changed |= shader.set_flag2(ShaderFlags2::VERTEX_COLORS, true);

        Ok(changed)
    }
}
