//! The mesh patch engine: drives the patcher framework across every mesh,
//! resolves winners, applies transforms, mirrors decisions into the plugin
//! patcher and produces duplicate meshes when plugin records disagree with
//! the mesh-level outcome.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use parallaxgen_files::nif::reader::NifReader;
use parallaxgen_files::nif::writer::NifWriter;
use parallaxgen_files::nif::NifFile;
use serde_json::json;

use crate::context::PgContext;
use crate::output::DiffEntry;
use crate::patchers::{
    self, CanApplyMap, MeshPatcherObjects, MeshPatcherRegistry, ShaderPatcherMatch, TexturePatcher,
};
use crate::plugin::{RecordHandle, TxstResult};
use crate::runner::TaskRunner;
use crate::settings::PatcherConfig;
use crate::textures::ShapeShader;
use crate::util::{self, logger};

mod registry;

pub use registry::build_registry;

/// Everything produced for one output mesh path.
#[derive(Default)]
struct NifResult {
    nif: Option<NifFile>,
    txst_results: Vec<TxstResult>,
    /// (old index3d, new index3d, shape name) after the block sort.
    idx_corrections: Vec<(usize, usize, String)>,
}

pub struct PatchEngine {
    registry: MeshPatcherRegistry,
    texture_patchers: Vec<Box<dyn TexturePatcher>>,
    /// Parsed meshes retained across phases under the high-memory flag.
    nif_cache: DashMap<String, Arc<NifFile>>,
    high_mem: bool,
}

impl PatchEngine {
    pub fn new(config: &PatcherConfig, high_mem: bool) -> Self {
        let (registry, texture_patchers) = build_registry(config);
        Self {
            registry,
            texture_patchers,
            nif_cache: DashMap::new(),
            high_mem,
        }
    }

    /// The dry-run conflict discovery pass: candidate matches only, with
    /// every multi-mod contention recorded on the mods involved. Mutates
    /// neither meshes, plugins nor the output tree.
    pub fn populate_mod_data(self: Arc<Self>, ctx: &Arc<PgContext>, multithread: bool, patch_plugin: bool) {
        let mut runner = TaskRunner::new(multithread);
        for mesh in self.eligible_meshes(ctx) {
            let engine = self.clone();
            let ctx = ctx.clone();
            runner.add_task(move || {
                if let Err(err) = engine.patch_nif(&ctx, &mesh, patch_plugin, true) {
                    logger::error(format!("Dry run failed for {mesh}: {err}"));
                }
            });
        }
        runner.run();
    }

    /// The real mesh patch phase, one task per mesh.
    pub fn patch(self: Arc<Self>, ctx: &Arc<PgContext>, multithread: bool, patch_plugin: bool) {
        let mut runner = TaskRunner::new(multithread);
        for mesh in self.eligible_meshes(ctx) {
            let engine = self.clone();
            let ctx = ctx.clone();
            runner.add_task(move || {
                if let Err(err) = engine.patch_nif(&ctx, &mesh, patch_plugin, false) {
                    logger::error(format!("Failed to patch {mesh}: {err}"));
                }
            });
        }
        runner.run();
    }

    /// The texture patch phase: global texture patchers over every indexed
    /// texture, one task per texture.
    pub fn patch_textures(self: Arc<Self>, ctx: &Arc<PgContext>, multithread: bool) {
        if self.texture_patchers.is_empty() {
            return;
        }

        let mut runner = TaskRunner::new(multithread);
        for texture in ctx.vfs.textures() {
            let engine = self.clone();
            let ctx = ctx.clone();
            runner.add_task(move || {
                engine.patch_dds(&ctx, &texture);
            });
        }
        runner.run();
    }

    fn eligible_meshes(&self, ctx: &PgContext) -> Vec<String> {
        ctx.vfs
            .meshes()
            .into_iter()
            .filter(|mesh| {
                if !ctx.config.nif_allowlist.is_empty() && !util::glob_match_any(mesh, &ctx.config.nif_allowlist) {
                    return false;
                }
                !util::glob_match_any(mesh, &ctx.config.nif_blocklist)
            })
            .collect()
    }

    fn patch_dds(&self, ctx: &PgContext, texture: &str) {
        let _prefix = logger::Prefix::new(texture.to_string());

        for patcher in &self.texture_patchers {
            if !patcher.applies_to(ctx, texture) {
                continue;
            }

            match patcher.apply(ctx, texture) {
                Ok(Some(bytes)) => {
                    if let Err(err) = ctx.output.write_file(texture, &bytes) {
                        logger::error(format!("Failed to write patched texture: {err}"));
                    }
                }
                Ok(None) => {}
                Err(err) => logger::error(format!("Texture patcher {} failed: {err}", patcher.name())),
            }
        }
    }

    fn load_nif(&self, ctx: &PgContext, nif_path: &str, bytes: &[u8]) -> Result<Arc<NifFile>> {
        if self.high_mem {
            if let Some(cached) = self.nif_cache.get(nif_path) {
                return Ok(cached.clone());
            }
        }

        let nif = Arc::new(NifReader::parse(bytes, true)?);
        if self.high_mem {
            self.nif_cache.insert(nif_path.to_string(), nif.clone());
        }
        Ok(nif)
    }

    fn patch_nif(&self, ctx: &PgContext, nif_path: &str, patch_plugin: bool, dry_run: bool) -> Result<()> {
        let _prefix = logger::Prefix::new(nif_path.to_string());
        logger::trace("Starting processing");

        // an unmodified verdict from a previous run short-circuits the
        // whole mesh, unless plugin records still need patching
        if !dry_run && !patch_plugin {
            if let Some(entry) = ctx.cache.get_nif(&ctx.vfs, nif_path) {
                if entry.get("modified").and_then(|v| v.as_bool()) == Some(false) {
                    logger::trace("Cache hit: mesh unmodified on previous run");
                    return Ok(());
                }
            }
        }

        let bytes = ctx.vfs.read_bytes(nif_path)?;
        let crc_original = crc32fast::hash(&bytes);

        let orig_nif = match self.load_nif(ctx, nif_path, &bytes) {
            Ok(nif) => nif,
            Err(err) => {
                // codec failure is a per-mesh failure, not a run failure
                logger::error(format!("Rejecting mesh: {err}"));
                return Ok(());
            }
        };

        let mut created: BTreeMap<String, NifResult> = BTreeMap::new();
        let modified = self.process_nif(ctx, nif_path, &orig_nif, patch_plugin, dry_run, None, &mut created)?;

        if dry_run {
            return Ok(());
        }

        for (written_path, result) in &created {
            let Some(nif) = &result.nif else {
                continue;
            };

            let out_bytes = NifWriter::write(nif)?;
            let crc_patched = crc32fast::hash(&out_bytes);
            ctx.output.write_file(written_path, &out_bytes)?;

            // duplicates derive from the same source bytes, so they share
            // the original checksum
            ctx.record_diff(
                written_path,
                DiffEntry {
                    crc32original: crc_original,
                    crc32patched: crc_patched,
                },
            );

            if let Some(plugin) = &ctx.plugin {
                if patch_plugin {
                    plugin.assign_mesh(written_path, nif_path, &result.txst_results);
                    for (old_index3d, new_index3d, shape_name) in &result.idx_corrections {
                        plugin.set_3d_indices(ctx, written_path, *old_index3d, *new_index3d, shape_name);
                    }
                }
            }
        }

        // merge into the classifier's cache entry rather than replacing it
        let mut cache_entry = ctx.cache.get_nif(&ctx.vfs, nif_path).unwrap_or_else(|| json!({}));
        if let Some(object) = cache_entry.as_object_mut() {
            object.insert("modified".to_string(), json!(modified));
        }
        ctx.cache.set_nif(&ctx.vfs, nif_path, cache_entry);

        Ok(())
    }

    /// Runs the shape pipeline over one parsed mesh. `force_shaders` marks a
    /// duplicate-mesh run: plugin integration is disabled and the given
    /// shader is forced per shape, which keeps duplication non-reentrant.
    #[allow(clippy::too_many_arguments)]
    fn process_nif(
        &self,
        ctx: &PgContext,
        nif_path: &str,
        orig_nif: &NifFile,
        patch_plugin: bool,
        dry_run: bool,
        force_shaders: Option<&BTreeMap<usize, ShapeShader>>,
        created: &mut BTreeMap<String, NifResult>,
    ) -> Result<bool> {
        let mut nif = orig_nif.clone();
        let mut nif_modified = false;

        let objects = self.registry.instantiate(nif_path, &nif);
        let shapes = nif.shapes();

        let mut shaders_applied_mesh: BTreeMap<usize, ShapeShader> = BTreeMap::new();
        // model record handle -> (index3d -> result)
        let mut record_tracker: BTreeMap<RecordHandle, BTreeMap<usize, TxstResult>> = BTreeMap::new();

        for (shape_block, old_index3d) in &shapes {
            let force_shader = match force_shaders {
                Some(forced) => match forced.get(old_index3d) {
                    Some(ShapeShader::Unknown) | None => continue,
                    Some(shader) => Some(*shader),
                },
                None => None,
            };

            let shape_name = nif.block_display_name(*shape_block).to_string();
            let _prefix = logger::Prefix::new(format!("{shape_block} / {shape_name}"));

            shaders_applied_mesh.insert(*old_index3d, ShapeShader::Unknown);

            // precondition checks: block type, shader class, texture set
            if nif.tri_shape(*shape_block).is_none() {
                logger::trace("Rejecting shape: unmodeled shape block type");
                continue;
            }
            let Some(shader_block) = nif.shader_for_shape(*shape_block) else {
                logger::trace("Rejecting shape: no shader property");
                continue;
            };
            if nif.lighting_shader(shader_block).is_none() {
                logger::trace(format!(
                    "Rejecting shape: shader block is {}",
                    nif.block_type_name(shader_block)
                ));
                continue;
            }
            if nif.texture_set_for_shape(*shape_block).is_none() {
                logger::trace("Rejecting shape: no texture set");
                continue;
            }

            let can_apply = objects.can_apply_map(ctx, &nif, *shape_block, force_shader);

            let (shader_applied, shape_changed) = self.process_shape(
                ctx,
                nif_path,
                &mut nif,
                *shape_block,
                *old_index3d,
                dry_run,
                &can_apply,
                &objects,
                force_shader,
            )?;
            nif_modified |= shape_changed;
            shaders_applied_mesh.insert(*old_index3d, shader_applied);

            // plugin integration for the base mesh run only
            if shader_applied != ShapeShader::Unknown && patch_plugin && force_shaders.is_none() {
                if let Some(plugin) = &ctx.plugin {
                    let results =
                        plugin.process_shape(ctx, &objects, nif_path, *shape_block, *old_index3d, dry_run, &can_apply)?;
                    for result in results {
                        record_tracker
                            .entry(result.model_rec)
                            .or_default()
                            .entry(*old_index3d)
                            .or_insert(result);
                    }
                }
            }
        }

        if dry_run {
            return Ok(false);
        }

        created.insert(nif_path.to_string(), NifResult::default());

        if patch_plugin && force_shaders.is_none() {
            let shape_idxs: Vec<usize> = shapes.iter().map(|(_, idx)| *idx).collect();
            let grouped = Self::group_plugin_results(&shaders_applied_mesh, &shape_idxs, record_tracker);

            for (dup_idx, (results, result_shaders)) in grouped {
                if dup_idx == 0 {
                    let entry = created.get_mut(nif_path).expect("base entry inserted above");
                    entry.txst_results = results;
                    continue;
                }

                let dup_path = Self::duplicate_nif_path(nif_path, dup_idx);
                let _dup_prefix = logger::Prefix::new(dup_path.clone());
                logger::debug("Creating duplicate mesh for conflicting plugin records");

                self.process_nif(ctx, &dup_path, orig_nif, patch_plugin, dry_run, Some(&result_shaders), created)?;
                if let Some(entry) = created.get_mut(&dup_path) {
                    entry.txst_results = results;
                }
            }
        }

        // global patchers
        for global in &objects.global {
            let _prefix = logger::Prefix::new(global.name());
            let changed = global.apply(ctx, &mut nif)?;
            nif_modified |= changed && global.trigger_save();
        }

        if !nif_modified && force_shaders.is_none() {
            created.remove(nif_path);
            return Ok(false);
        }

        // normalize block order before save; shapes can move, so record the
        // old-to-new 3D index shift of every shape for the record patcher
        let block_map = nif.sort_blocks();

        let mut result = created.remove(nif_path).unwrap_or_default();
        if patch_plugin && force_shaders.is_none() {
            let new_shapes = nif.shapes();
            for (shape_block, old_index3d) in &shapes {
                let new_block = block_map.get(*shape_block).copied().unwrap_or(*shape_block);
                let Some((_, new_index3d)) = new_shapes.iter().find(|(block_id, _)| *block_id == new_block) else {
                    logger::error(format!("Shape block {shape_block} missing after block sort"));
                    continue;
                };

                result.idx_corrections.push((
                    *old_index3d,
                    *new_index3d,
                    nif.block_display_name(new_block).to_string(),
                ));
            }
        }
        result.nif = Some(nif);
        created.insert(nif_path.to_string(), result);

        Ok(true)
    }

    /// Groups plugin results into output meshes: records whose per-shape
    /// shader vector equals the mesh's own get the base mesh, every other
    /// distinct vector yields one `pg<N>` duplicate.
    fn group_plugin_results(
        shaders_applied_mesh: &BTreeMap<usize, ShapeShader>,
        shape_idxs: &[usize],
        record_tracker: BTreeMap<RecordHandle, BTreeMap<usize, TxstResult>>,
    ) -> BTreeMap<usize, (Vec<TxstResult>, BTreeMap<usize, ShapeShader>)> {
        let mut output: BTreeMap<usize, (Vec<TxstResult>, BTreeMap<usize, ShapeShader>)> = BTreeMap::new();
        let mut mesh_tracker: HashMap<String, usize> = HashMap::new();
        let mut num_mesh = 0usize;

        for (_model_rec, results) in record_tracker {
            let mut results_to_apply = Vec::new();
            let mut result_shaders: BTreeMap<usize, ShapeShader> = BTreeMap::new();
            let mut serialized = String::new();

            for old_index3d in shape_idxs {
                let mut shader_applied = ShapeShader::Unknown;
                if let Some(result) = results.get(old_index3d) {
                    shader_applied = result.shader;
                    results_to_apply.push(result.clone());
                }
                if shader_applied == ShapeShader::Unknown {
                    shader_applied = shaders_applied_mesh
                        .get(old_index3d)
                        .copied()
                        .unwrap_or(ShapeShader::Unknown);
                }

                result_shaders.insert(*old_index3d, shader_applied);
                serialized.push_str(&format!("{old_index3d}/{},", shader_applied.label()));
            }

            let dup_idx = match mesh_tracker.get(&serialized) {
                Some(existing) => *existing,
                None => {
                    if result_shaders != *shaders_applied_mesh {
                        num_mesh += 1;
                        num_mesh
                    } else {
                        0
                    }
                }
            };

            let entry = output.entry(dup_idx).or_default();
            entry.0.extend(results_to_apply);
            entry.1 = result_shaders;

            mesh_tracker.insert(serialized, dup_idx);
        }

        output
    }

    /// `meshes\armor\a.nif` + index 2 -> `meshes\pg2\armor\a.nif`.
    fn duplicate_nif_path(nif_path: &str, index: usize) -> String {
        let (first, rest) = util::split_first_component(nif_path);
        if rest.is_empty() {
            format!("pg{index}\\{first}")
        } else {
            format!("{first}\\pg{index}\\{rest}")
        }
    }

    /// The per-shape pipeline: pre patchers, match selection, transform,
    /// apply, post patchers. Returns the shader applied (None for the
    /// default outcome) and whether the mesh changed.
    #[allow(clippy::too_many_arguments)]
    fn process_shape(
        &self,
        ctx: &PgContext,
        nif_path: &str,
        nif: &mut NifFile,
        shape_block: usize,
        old_index3d: usize,
        dry_run: bool,
        can_apply: &CanApplyMap,
        objects: &MeshPatcherObjects,
        force_shader: Option<ShapeShader>,
    ) -> Result<(ShapeShader, bool)> {
        let mut changed = false;
        let old_slots = nif.texture_slots(shape_block);

        for pre in &objects.pre {
            let _prefix = logger::Prefix::new(pre.name());
            let pre_changed = pre.apply(ctx, nif, shape_block)?;
            changed |= pre_changed && pre.trigger_save();
        }

        let mut shader_applied = ShapeShader::None;

        let mut matches = patchers::get_matches(ctx, &old_slots, objects, dry_run);
        if dry_run {
            return Ok((shader_applied, false));
        }

        patchers::filter_matches(&mut matches, can_apply);

        if let Some(forced) = force_shader {
            matches.retain(|m| m.shader == forced || m.transform_to == Some(forced));
            changed = true;

            if matches.is_empty() {
                // an alternate texture demands this shader even though
                // nothing matches: force the non-slot state only
                shader_applied = forced;
                if let Some(patcher) = objects.shader_patcher(forced) {
                    patcher.apply_shader(ctx, nif, shape_block)?;
                }
                return Ok((shader_applied, changed));
            }
        }

        if let Some(mut winning) = patchers::get_winning_match(&matches) {
            let transformed = patchers::apply_transform_if_needed(ctx, &mut winning, objects)?;
            if transformed {
                logger::trace(format!("Transformed match: {}", winning.to_json()));
            }

            shader_applied = winning.shader;
            if shader_applied != ShapeShader::Unknown {
                if let Some(patcher) = objects.shader_patcher(shader_applied) {
                    let (new_slots, apply_changed) =
                        patcher.apply(ctx, nif, shape_block, &old_slots, &winning.patcher_match)?;
                    changed |= apply_changed;

                    self.record_diag(ctx, nif_path, old_index3d, &winning, &old_slots, &new_slots);

                    for matched_from in &winning.patcher_match.matched_from {
                        let idx = u32::from(*matched_from) as usize;
                        ctx.warnings
                            .mismatch(&ctx.vfs, &ctx.mmd, &winning.patcher_match.matched_path, &new_slots[idx]);
                    }
                    ctx.warnings
                        .mesh(&ctx.vfs, &ctx.mmd, &winning.patcher_match.matched_path, nif_path);

                    ctx.patched_sets
                        .insert((nif_path.to_string(), shape_block), (old_slots.clone(), new_slots, shader_applied));
                }
            }
        }

        for post in &objects.post {
            let _prefix = logger::Prefix::new(post.name());
            let post_changed = post.apply(ctx, nif, shape_block)?;
            changed |= post_changed && post.trigger_save();
        }

        Ok((shader_applied, changed))
    }

    fn record_diag(
        &self,
        ctx: &PgContext,
        nif_path: &str,
        old_index3d: usize,
        winning: &ShaderPatcherMatch,
        old_slots: &crate::textures::TextureSet,
        new_slots: &crate::textures::TextureSet,
    ) {
        if !ctx.diag.is_enabled() {
            return;
        }
        let shape_key = old_index3d.to_string();
        ctx.diag.insert(
            &["meshes", nif_path, "shapes", &shape_key],
            json!({
                "origTextures": old_slots,
                "newTextures": new_slots,
                "winningShaderMatch": winning.to_json(),
            }),
        );
    }
}
