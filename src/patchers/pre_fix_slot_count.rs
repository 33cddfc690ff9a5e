//! Some exporters write texture sets with trailing slots past the nine the
//! game reads. Truncate them before matching so slot comparisons line up.

use anyhow::Result;
use parallaxgen_files::nif::{Block, NifFile, NUM_TEXTURE_SLOTS};

use crate::context::PgContext;
use crate::patchers::{PreMeshFactory, PreMeshPatcher};
use crate::util::logger;

pub struct PreFixSlotCount;

impl PreFixSlotCount {
    pub fn factory() -> PreMeshFactory {
        Box::new(|_nif_path, _nif| Box::new(PreFixSlotCount))
    }
}

impl PreMeshPatcher for PreFixSlotCount {
    fn name(&self) -> &'static str {
        "FixTextureSlotCount"
    }

    fn apply(&self, _ctx: &PgContext, nif: &mut NifFile, shape: usize) -> Result<bool> {
        let Some(set_block) = nif.texture_set_for_shape(shape) else {
            return Ok(false);
        };
        let Some(Block::TextureSet(set)) = nif.blocks.get_mut(set_block).map(|b| &mut b.block) else {
            return Ok(false);
        };

        if set.textures.len() <= NUM_TEXTURE_SLOTS {
            return Ok(false);
        }

        let dropped = set.textures.split_off(NUM_TEXTURE_SLOTS);
        if dropped.iter().all(String::is_empty) {
            // trailing empties are not worth a rewrite on their own
            set.textures.extend(dropped);
            return Ok(false);
        }

        logger::debug(format!("Dropped {} trailing texture slots", dropped.len()));
        Ok(true)
    }
}
