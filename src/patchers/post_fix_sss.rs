//! Soft-lit shapes that reuse their diffuse as the glow map get a proper
//! generated subsurface texture instead.

use anyhow::Result;
use parallaxgen_files::nif::{NifFile, ShaderFlags2, TextureSlot};

use crate::context::PgContext;
use crate::patchers::{hooks, PostMeshFactory, PostMeshPatcher};

pub struct PostFixSss;

impl PostFixSss {
    pub fn factory() -> PostMeshFactory {
        Box::new(|_nif_path, _nif| Box::new(PostFixSss))
    }
}

impl PostMeshPatcher for PostFixSss {
    fn name(&self) -> &'static str {
        "FixSSS"
    }

    fn apply(&self, ctx: &PgContext, nif: &mut NifFile, shape: usize) -> Result<bool> {
        let has_soft_lighting = nif
            .shader_for_shape(shape)
            .and_then(|b| nif.lighting_shader(b))
            .map(|s| s.flags2.contains(ShaderFlags2::SOFT_LIGHTING))
            .unwrap_or(false);
        if !has_soft_lighting {
            return Ok(false);
        }

        let slots = nif.texture_slots(shape);
        let diffuse = &slots[u32::from(TextureSlot::Diffuse) as usize];
        let glow = &slots[u32::from(TextureSlot::Glow) as usize];

        // only the diffuse-doubling-as-glow case needs fixing
        if diffuse.is_empty() || diffuse != glow || !diffuse.ends_with(".dds") {
            return Ok(false);
        }

        let Some(generated) = hooks::fix_sss(ctx, diffuse) else {
            return Ok(false);
        };

        nif.set_texture_slot(shape, TextureSlot::Glow, &generated)
            .map_err(Into::into)
    }
}
