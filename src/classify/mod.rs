//! The texture classifier: a parallel scan over every mesh accumulates
//! (slot, role) votes per texture, then a sequential finalization assigns
//! each texture exactly one role, consulting suffix heuristics, user
//! overrides, the vanilla-archive rules and the GPU-backed
//! complex-material test.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use parallaxgen_files::dds::{AlphaMode, DdsFormat};
use parallaxgen_files::nif::reader::NifReader;
use parallaxgen_files::nif::TextureSlot;
use serde_json::json;

use crate::context::PgContext;
use crate::runner::TaskRunner;
use crate::textures::{self, TextureAttributes, TextureType};
use crate::util::{self, logger};

#[derive(Debug, Default, Clone)]
struct UnconfirmedTexture {
    slot_votes: HashMap<TextureSlot, usize>,
    type_votes: HashMap<TextureType, usize>,
}

type UnconfirmedMap = HashMap<String, UnconfirmedTexture>;

pub struct TextureClassifier;

impl TextureClassifier {
    /// Runs both phases and installs the final mappings into the context's
    /// texture lock.
    pub fn run(ctx: &Arc<PgContext>, multithread: bool) -> Result<()> {
        logger::info("Starting to build texture mappings");

        let unconfirmed = Arc::new(Mutex::new(UnconfirmedMap::new()));

        let mut runner = TaskRunner::new(multithread);
        for mesh in ctx.vfs.meshes() {
            if !ctx.config.nif_allowlist.is_empty() && !util::glob_match_any(&mesh, &ctx.config.nif_allowlist) {
                logger::debug(format!("Skipping mesh due to allowlist: {mesh}"));
                continue;
            }
            if util::glob_match_any(&mesh, &ctx.config.nif_blocklist) {
                logger::debug(format!("Skipping mesh due to blocklist: {mesh}"));
                continue;
            }

            let ctx = ctx.clone();
            let unconfirmed = unconfirmed.clone();
            runner.add_task(move || {
                Self::scan_nif(&ctx, &mesh, &unconfirmed);
            });
        }
        runner.run();

        let unconfirmed = Arc::try_unwrap(unconfirmed)
            .map(|m| m.into_inner().unwrap_or_else(|e| e.into_inner()))
            .unwrap_or_default();

        Self::finalize(ctx, unconfirmed);
        Ok(())
    }

    /// Phase 1, one task per mesh: accumulate votes from every shape's
    /// filled slots. Recoverable failures reject the mesh and log.
    fn scan_nif(ctx: &PgContext, mesh_path: &str, unconfirmed: &Mutex<UnconfirmedMap>) {
        let _prefix = logger::Prefix::new(mesh_path.to_string());

        // a cache hit replays the recorded votes without re-parsing
        if let Some(entry) = ctx.cache.get_nif(&ctx.vfs, mesh_path) {
            if let Some(votes) = entry.get("textureVotes").and_then(|v| v.as_array()) {
                let mut map = unconfirmed.lock().unwrap_or_else(|e| e.into_inner());
                for vote in votes {
                    let (Some(path), Some(slot), Some(ttype)) = (
                        vote.get("path").and_then(|v| v.as_str()),
                        vote.get("slot").and_then(|v| v.as_u64()),
                        vote.get("type").and_then(|v| serde_json::from_value::<TextureType>(v.clone()).ok()),
                    ) else {
                        continue;
                    };
                    let Ok(slot) = TextureSlot::try_from(slot as u32) else {
                        continue;
                    };
                    let entry = map.entry(path.to_string()).or_default();
                    *entry.slot_votes.entry(slot).or_default() += 1;
                    *entry.type_votes.entry(ttype).or_default() += 1;
                }
                logger::trace("Classification cache hit");
                return;
            }
        }

        let bytes = match ctx.vfs.read_bytes(mesh_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                logger::error(format!("Failed to read mesh: {err}"));
                return;
            }
        };

        let nif = match NifReader::parse(&bytes, true) {
            Ok(nif) => nif,
            Err(err) => {
                logger::error(format!("Rejecting mesh: {err}"));
                return;
            }
        };

        let mut votes = Vec::new();
        for (shape_block, _) in nif.shapes() {
            let Some(shader) = nif.shader_for_shape(shape_block).and_then(|b| nif.lighting_shader(b)) else {
                continue;
            };

            let slots = nif.texture_slots(shape_block);
            for (i, slot) in TextureSlot::ALL.iter().enumerate() {
                if slots[i].is_empty() {
                    continue;
                }

                let canonical = util::canonicalize_path(&slots[i]);
                let ttype =
                    textures::infer_type_from_shape(*slot, shader.shader_type, shader.flags1, shader.flags2);
                votes.push((canonical, *slot, ttype));
            }
        }

        {
            let mut map = unconfirmed.lock().unwrap_or_else(|e| e.into_inner());
            for (path, slot, ttype) in &votes {
                let entry = map.entry(path.clone()).or_default();
                *entry.slot_votes.entry(*slot).or_default() += 1;
                *entry.type_votes.entry(*ttype).or_default() += 1;
            }
        }

        let cache_votes: Vec<_> = votes
            .iter()
            .map(|(path, slot, ttype)| {
                json!({
                    "path": path,
                    "slot": u32::from(*slot),
                    "type": serde_json::to_value(ttype).unwrap_or_default(),
                })
            })
            .collect();
        ctx.cache.set_nif(&ctx.vfs, mesh_path, json!({ "textureVotes": cache_votes }));
    }

    /// Phase 2, sequential: decide each texture's final (slot, role).
    fn finalize(ctx: &PgContext, unconfirmed: UnconfirmedMap) {
        let mut mappings = ctx.textures.write().unwrap_or_else(|e| e.into_inner());

        // every texture on disk participates, voted on or not
        let mut all: UnconfirmedMap = unconfirmed;
        for texture in ctx.vfs.textures() {
            all.entry(texture).or_default();
        }

        let mut ordered: Vec<_> = all.into_iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0));

        for (texture, votes) in ordered {
            let mut winning_slot = Self::winning_key(&votes.slot_votes);
            let mut winning_type = Self::winning_key(&votes.type_votes);

            if winning_slot.is_none() && winning_type.is_none() {
                let (slot, ttype) = textures::defaults_from_suffix(&texture);
                winning_slot = slot;
                winning_type = if ttype == TextureType::Unknown { None } else { Some(ttype) };
            }

            if let Some(overridden) = ctx.config.manual_texture_maps.get(&texture) {
                winning_type = Some(*overridden);
                winning_slot = overridden.slot();
            }

            let (Some(slot), Some(mut ttype)) = (winning_slot, winning_type) else {
                continue;
            };

            // vanilla textures are never elevated to parallax sources
            if slot == TextureSlot::Parallax && ctx.vfs.is_file_in_archives(&texture, &ctx.config.vanilla_bsa_list) {
                continue;
            }

            let mut attributes = TextureAttributes::empty();
            if ttype == TextureType::EnvironmentMask
                && !ctx.vfs.is_file_in_archives(&texture, &ctx.config.vanilla_bsa_list)
            {
                let (is_cm, cm_attributes) = Self::check_complex_material(ctx, &texture);
                if is_cm {
                    ttype = TextureType::ComplexMaterial;
                    attributes = cm_attributes;
                }
            }

            mappings.insert(slot, &texture, ttype, attributes);
        }

        logger::info(format!("Classified {} textures", mappings.types.len()));
    }

    fn winning_key<K: Copy + Ord>(votes: &HashMap<K, usize>) -> Option<K> {
        // ties break toward the smaller key (slot ordinal / declaration
        // order), which keeps reruns stable
        let mut ordered: Vec<_> = votes.iter().collect();
        ordered.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        ordered.first().map(|(k, _)| **k)
    }

    fn cm_candidate_format(format: DdsFormat) -> bool {
        matches!(
            format,
            DdsFormat::Bc2
                | DdsFormat::Bc3
                | DdsFormat::Bc7
                | DdsFormat::Rgba8
                | DdsFormat::Bgra8
                | DdsFormat::Rgba16
                | DdsFormat::Rgba16F
                | DdsFormat::Rgba32F
                | DdsFormat::Rgb10A2
        )
    }

    /// The complex-material test: meaningful alpha payload under half the
    /// pixel count marks the texture CM, with attribute flags from the RGB
    /// channel populations. Results are cached per mtime.
    fn check_complex_material(ctx: &PgContext, texture: &str) -> (bool, TextureAttributes) {
        if let Some(entry) = ctx.cache.get_tex(&ctx.vfs, texture) {
            if let (Some(is_cm), Some(bits)) = (
                entry.get("isCM").and_then(|v| v.as_bool()),
                entry.get("attributes").and_then(|v| v.as_u64()),
            ) {
                return (is_cm, TextureAttributes::from_bits_truncate(bits as u8));
            }
        }

        let (is_cm, attributes) = Self::check_complex_material_uncached(ctx, texture);
        ctx.cache.set_tex(
            &ctx.vfs,
            texture,
            json!({ "isCM": is_cm, "attributes": attributes.bits() }),
        );
        (is_cm, attributes)
    }

    fn check_complex_material_uncached(ctx: &PgContext, texture: &str) -> (bool, TextureAttributes) {
        let not_cm = (false, TextureAttributes::empty());

        let Some(metadata) = ctx.gpu.load_dds_metadata(&ctx.vfs, texture) else {
            logger::error(format!("Failed to check if {texture} is complex material"));
            return not_cm;
        };

        if metadata.alpha_mode == AlphaMode::Opaque {
            return not_cm;
        }
        if !Self::cm_candidate_format(metadata.format) {
            return not_cm;
        }

        let Some((_, image)) = ctx.gpu.load_dds(&ctx.vfs, texture) else {
            // undecodable candidate (e.g. BC7): degrade to not-CM
            logger::debug(format!("Cannot decode {texture} for CM classification"));
            return not_cm;
        };

        let populations = ctx.gpu.count_channel_populations(&image);
        let pixel_count = image.pixel_count() as u32;

        // a mostly-populated alpha channel is opacity, not height
        if populations[3] > pixel_count / 2 {
            return not_cm;
        }

        let mut attributes = TextureAttributes::empty();
        if populations[0] > 0 {
            attributes |= TextureAttributes::CM_ENV_MASK;
        }
        if populations[1] > 0 {
            attributes |= TextureAttributes::CM_GLOSSINESS;
        }
        if populations[2] > 0 {
            attributes |= TextureAttributes::CM_METALNESS;
        }

        (true, attributes)
    }
}
