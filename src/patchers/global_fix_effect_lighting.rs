//! Community Shaders needs effect-lit effect shaders to carry the uniform
//! scale flag and a maxed lighting-influence byte.

use anyhow::Result;
use parallaxgen_files::nif::{Block, NifFile, ShaderFlags2};

use crate::context::PgContext;
use crate::patchers::{GlobalMeshFactory, GlobalMeshPatcher};

const LIGHTING_INFLUENCE_SHIFT: u32 = 8;
const LIGHTING_INFLUENCE_MASK: u32 = 0xff << LIGHTING_INFLUENCE_SHIFT;
const LIGHTING_INFLUENCE_MAX: u32 = 255 << LIGHTING_INFLUENCE_SHIFT;

pub struct GlobalFixEffectLighting;

impl GlobalFixEffectLighting {
    pub fn factory() -> GlobalMeshFactory {
        Box::new(|_nif_path, _nif| Box::new(GlobalFixEffectLighting))
    }
}

impl GlobalMeshPatcher for GlobalFixEffectLighting {
    fn name(&self) -> &'static str {
        "FixEffectLightingCS"
    }

    fn apply(&self, _ctx: &PgContext, nif: &mut NifFile) -> Result<bool> {
        let mut changed = false;

        for nif_block in &mut nif.blocks {
            let Block::EffectShader(effect) = &mut nif_block.block else {
                continue;
            };

            if effect.flags2.contains(ShaderFlags2::UNIFORM_SCALE) {
                // assumed already patched
                continue;
            }
            if !effect.flags2.contains(ShaderFlags2::EFFECT_LIGHTING) {
                continue;
            }

            effect.flags2.insert(ShaderFlags2::UNIFORM_SCALE);
            changed = true;

            if effect.texture_clamp_mode & LIGHTING_INFLUENCE_MASK != LIGHTING_INFLUENCE_MAX {
                effect.texture_clamp_mode =
                    (effect.texture_clamp_mode & !LIGHTING_INFLUENCE_MASK) | LIGHTING_INFLUENCE_MAX;
            }
        }

        Ok(changed)
    }
}
