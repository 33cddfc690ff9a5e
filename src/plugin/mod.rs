//! Record-level patching: mirrors mesh decisions into TextureSet records,
//! allocating stable form ids for new TXSTs and rewiring model references
//! for duplicated meshes.
//!
//! The plugin-editing library itself is an external collaborator behind
//! [`RecordStore`]; the in-memory store below implements the contract for
//! the patch pipeline and serializes the created records through the ESP
//! writer. The store is not thread-safe by contract, so every operation in
//! this module runs under a single process-wide lock.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{bail, Result};
use parallaxgen_files::esp::{EspWriter, PluginDescriptor, TxstRecord};
use serde_json::json;

use crate::context::PgContext;
use crate::patchers::{self, CanApplyMap, MeshPatcherObjects};
use crate::textures::{ShapeShader, TextureSet, NUM_TEXTURE_SLOTS};
use crate::util::{self, logger};

pub const PLUGIN_NAME: &str = "PGPatcher.esp";

/// Form ids are assignable in the low 24 bits only.
pub const MAX_FORM_ID: u32 = 0x00ff_ffff;
const FIRST_FORM_ID: u32 = 0x800;

pub type RecordHandle = usize;

/// One alternate-texture entry resolved for a (mesh, 3D index) pair.
#[derive(Debug, Clone)]
pub struct AltTexInfo {
    pub alt_tex: RecordHandle,
    pub txst: RecordHandle,
    pub model_rec: RecordHandle,
    /// The model path the record carries (canonical).
    pub matched_nif: String,
    /// Record type of the carrier (weapon, armor, static, ...).
    pub match_type: String,
    pub alt_tex_mod: String,
    pub alt_tex_form_id: u32,
}

/// The contract the engine needs from a plugin-editing backend.
pub trait RecordStore: Send {
    /// Reads the game's active plugins in load order. Called once per run.
    fn initialize(&mut self, game_plugins: &[String]) -> Result<()>;

    /// Indexes every model/TXST/alternate-texture triple for O(1) lookups.
    fn populate_objects(&mut self) -> Result<()>;

    fn matching_alt_textures(&self, nif_path: &str, index3d: usize) -> Vec<AltTexInfo>;

    fn txst_slots(&self, txst: RecordHandle) -> TextureSet;

    fn create_txst(&mut self, slots: &TextureSet, edid: &str, form_id: u32) -> RecordHandle;

    fn set_alt_tex_txst(&mut self, alt_tex: RecordHandle, txst: RecordHandle);

    fn set_alt_tex_index3d(&mut self, alt_tex: RecordHandle, index3d: usize);

    fn set_model_nif(&mut self, model_rec: RecordHandle, nif_path: &str);

    /// Form ids already taken by existing records in the patch plugin's
    /// space.
    fn used_form_ids(&self) -> HashSet<u32>;

    /// Serializes the patch plugin into the output directory.
    fn save_plugin(&self, output_dir: &Path, esmify: bool) -> Result<()>;
}

/// Outcome of patching one alternate-texture record.
#[derive(Debug, Clone)]
pub struct TxstResult {
    pub shader: ShapeShader,
    pub txst: RecordHandle,
    pub alt_tex: RecordHandle,
    pub model_rec: RecordHandle,
    pub matched_nif: String,
}

struct PluginState {
    store: Box<dyn RecordStore>,
    /// new slot tuple -> (created txst, edid), the dedup map
    created_txsts: HashMap<TextureSet, (RecordHandle, String)>,
    /// stable cache key -> form id from previous runs
    cached_form_ids: HashMap<String, u32>,
    /// ids taken by records that already exist in the plugin space
    store_form_ids: HashSet<u32>,
    /// every id a fresh allocation must avoid: existing records, reserved
    /// cache entries, and ids claimed this run
    used_form_ids: HashSet<u32>,
    /// ids handed out this run (cached reuse included)
    claimed_form_ids: HashSet<u32>,
    /// cache keys allocated this run, persisted at the end
    new_form_ids: HashMap<String, u32>,
    next_form_id: u32,
}

pub struct PluginPatcher {
    state: Mutex<PluginState>,
}

impl PluginPatcher {
    pub fn new(store: Box<dyn RecordStore>) -> Self {
        Self {
            state: Mutex::new(PluginState {
                store,
                created_txsts: HashMap::new(),
                cached_form_ids: HashMap::new(),
                store_form_ids: HashSet::new(),
                used_form_ids: HashSet::new(),
                claimed_form_ids: HashSet::new(),
                new_form_ids: HashMap::new(),
                next_form_id: FIRST_FORM_ID,
            }),
        }
    }

    pub fn initialize(&self, game_plugins: &[String], cached_form_ids: HashMap<String, u32>) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.store.initialize(game_plugins)?;

        // reserve every cached form id before serving new allocations
        state.store_form_ids = state.store.used_form_ids();
        state.used_form_ids = state.store_form_ids.clone();
        let reserved: Vec<u32> = cached_form_ids.values().copied().collect();
        state.used_form_ids.extend(reserved);
        state.cached_form_ids = cached_form_ids;
        Ok(())
    }

    pub fn populate_objects(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.store.populate_objects()
    }

    /// New allocations made this run, for the persistent cache.
    pub fn form_id_cache(&self) -> HashMap<String, u32> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut merged = state.cached_form_ids.clone();
        merged.extend(state.new_form_ids.clone());
        merged
    }

    /// Finds and patches every alternate-texture record pointing at
    /// (nif_path, index3d). In a dry run only candidate discovery happens.
    #[allow(clippy::too_many_arguments)]
    pub fn process_shape(
        &self,
        ctx: &PgContext,
        objects: &MeshPatcherObjects,
        nif_path: &str,
        shape_block: usize,
        index3d: usize,
        dry_run: bool,
        can_apply: &CanApplyMap,
    ) -> Result<Vec<TxstResult>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut results = Vec::new();

        let alt_textures = state.store.matching_alt_textures(nif_path, index3d);
        for info in alt_textures {
            let form_id_cache_key = format!(
                "{}/{}/{}/{index3d}",
                info.alt_tex_mod, info.alt_tex_form_id, info.match_type
            );

            let mut old_slots = state.store.txst_slots(info.txst);
            for slot in &mut old_slots {
                *slot = util::canonicalize_path(slot);
            }

            // strip the PBR prefix so the slots can be matched like any
            // other texture set
            let mut base_slots = old_slots.clone();
            for slot in &mut base_slots {
                if let Some(rest) = slot.strip_prefix("textures\\pbr\\") {
                    *slot = format!("textures\\{rest}");
                }
            }

            // when the record carries the exact tuple the mesh pipeline
            // already resolved for this shape, reuse that outcome instead of
            // re-running match selection
            let memo = ctx
                .patched_sets
                .get(&(nif_path.to_string(), shape_block))
                .filter(|memo| memo.0 == base_slots)
                .map(|memo| (memo.1.clone(), memo.2));

            let (winning, new_slots) = if let Some((memo_slots, memo_shader)) = memo {
                logger::trace(format!("Plugin patching | {nif_path} | {index3d} | reusing mesh decision"));
                let winning = patchers::ShaderPatcherMatch {
                    owning_mod: None,
                    shader: memo_shader,
                    patcher_match: Default::default(),
                    transform_to: None,
                };
                (winning, memo_slots)
            } else {
                let mut matches = patchers::get_matches(ctx, &base_slots, objects, dry_run);
                if dry_run {
                    continue;
                }

                patchers::filter_matches(&mut matches, can_apply);

                let mut winning = match patchers::get_winning_match(&matches) {
                    Some(winning) => winning,
                    None => patchers::ShaderPatcherMatch {
                        owning_mod: None,
                        shader: ShapeShader::None,
                        patcher_match: Default::default(),
                        transform_to: None,
                    },
                };

                patchers::apply_transform_if_needed(ctx, &mut winning, objects)?;
                if winning.shader == ShapeShader::Unknown {
                    winning.shader = ShapeShader::None;
                }

                let Some(patcher) = objects.shader_patcher(winning.shader) else {
                    continue;
                };
                let new_slots = patcher.apply_slots(ctx, &base_slots, &winning.patcher_match);

                for matched_from in &winning.patcher_match.matched_from {
                    let idx = u32::from(*matched_from) as usize;
                    ctx.warnings
                        .mismatch(&ctx.vfs, &ctx.mmd, &winning.patcher_match.matched_path, &new_slots[idx]);
                }
                ctx.warnings
                    .mesh(&ctx.vfs, &ctx.mmd, &winning.patcher_match.matched_path, nif_path);

                (winning, new_slots)
            };

            if dry_run {
                continue;
            }

            let mut result = TxstResult {
                shader: winning.shader,
                txst: info.txst,
                alt_tex: info.alt_tex,
                model_rec: info.model_rec,
                matched_nif: info.matched_nif.clone(),
            };

            let differs = (0..NUM_TEXTURE_SLOTS).any(|i| !old_slots[i].eq_ignore_ascii_case(&new_slots[i]));
            if !differs {
                logger::trace(format!("Plugin patching | {nif_path} | {index3d} | nothing to change"));
                results.push(result);
                continue;
            }

            if let Some((txst, edid)) = state.created_txsts.get(&new_slots) {
                logger::trace(format!("Plugin patching | {nif_path} | {index3d} | reusing TXST {edid}"));
                result.txst = *txst;
                results.push(result);
                continue;
            }

            // allocate a form id: prefer the one this record got last run,
            // unless something else claimed it in the meantime
            let cached = state.cached_form_ids.get(&form_id_cache_key).copied();
            let new_form_id = match cached {
                Some(cached)
                    if !state.claimed_form_ids.contains(&cached) && !state.store_form_ids.contains(&cached) =>
                {
                    cached
                }
                _ => {
                    let mut candidate = state.next_form_id;
                    while state.used_form_ids.contains(&candidate) {
                        candidate += 1;
                    }
                    state.next_form_id = candidate + 1;
                    candidate
                }
            };

            if new_form_id > MAX_FORM_ID {
                bail!("form id overflow while allocating TXST records");
            }
            state.used_form_ids.insert(new_form_id);
            state.claimed_form_ids.insert(new_form_id);
            state.new_form_ids.insert(form_id_cache_key.clone(), new_form_id);

            let edid_label = util::path_stem(&base_slots[0]);
            let edid = format!("PG_{edid_label}_{new_form_id:06X}");

            logger::trace(format!("Plugin patching | {nif_path} | {index3d} | creating TXST {edid}"));
            let txst = state.store.create_txst(&new_slots, &edid, new_form_id);
            if let Some(patcher) = objects.shader_patcher(winning.shader) {
                patcher.process_new_txst_record(&winning.patcher_match, &edid);
            }

            state.created_txsts.insert(new_slots.clone(), (txst, edid.clone()));

            ctx.diag.insert(
                &["plugin", &form_id_cache_key],
                json!({ "newTXST": edid, "shader": winning.shader.label() }),
            );

            result.txst = txst;
            results.push(result);
        }

        Ok(results)
    }

    /// Commits the results for one written mesh: sets the TXST on each
    /// record and rewires the model path when the mesh was duplicated.
    pub fn assign_mesh(&self, written_nif_path: &str, original_nif_path: &str, results: &[TxstResult]) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        for result in results {
            if !result.matched_nif.eq_ignore_ascii_case(original_nif_path) {
                continue;
            }

            if !result.matched_nif.eq_ignore_ascii_case(written_nif_path) {
                state.store.set_model_nif(result.model_rec, written_nif_path);
            }
            state.store.set_alt_tex_txst(result.alt_tex, result.txst);
        }
    }

    /// Updates record 3D indices after the post-save block sort. Lookups go
    /// through the store's populate-time index, so records already moved by
    /// an earlier correction of the same mesh cannot be matched twice.
    pub fn set_3d_indices(
        &self,
        ctx: &PgContext,
        nif_path: &str,
        old_index3d: usize,
        new_index3d: usize,
        shape_name: &str,
    ) {
        if old_index3d == new_index3d {
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let matches = state.store.matching_alt_textures(nif_path, old_index3d);
        for info in matches {
            if !info.matched_nif.eq_ignore_ascii_case(nif_path) {
                continue;
            }

            let alt_tex_key = format!("{}/{}/{}", info.alt_tex_mod, info.alt_tex_form_id, info.match_type);
            ctx.diag.insert(
                &["plugin", &alt_tex_key, shape_name, "newIndex3D"],
                json!(new_index3d),
            );

            logger::trace(format!("Setting 3D index for alt tex {} to {new_index3d}", info.alt_tex));
            state.store.set_alt_tex_index3d(info.alt_tex, new_index3d);
        }
    }

    pub fn save_plugin(&self, output_dir: &Path, esmify: bool) -> Result<()> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.store.save_plugin(output_dir, esmify)
    }
}

/// Shared-handle delegation so a caller can keep inspecting a store it
/// handed to the patcher.
impl<T: RecordStore> RecordStore for std::sync::Arc<Mutex<T>> {
    fn initialize(&mut self, game_plugins: &[String]) -> Result<()> {
        self.lock().unwrap_or_else(|e| e.into_inner()).initialize(game_plugins)
    }

    fn populate_objects(&mut self) -> Result<()> {
        self.lock().unwrap_or_else(|e| e.into_inner()).populate_objects()
    }

    fn matching_alt_textures(&self, nif_path: &str, index3d: usize) -> Vec<AltTexInfo> {
        self.lock()
            .unwrap_or_else(|e| e.into_inner())
            .matching_alt_textures(nif_path, index3d)
    }

    fn txst_slots(&self, txst: RecordHandle) -> TextureSet {
        self.lock().unwrap_or_else(|e| e.into_inner()).txst_slots(txst)
    }

    fn create_txst(&mut self, slots: &TextureSet, edid: &str, form_id: u32) -> RecordHandle {
        self.lock()
            .unwrap_or_else(|e| e.into_inner())
            .create_txst(slots, edid, form_id)
    }

    fn set_alt_tex_txst(&mut self, alt_tex: RecordHandle, txst: RecordHandle) {
        self.lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_alt_tex_txst(alt_tex, txst)
    }

    fn set_alt_tex_index3d(&mut self, alt_tex: RecordHandle, index3d: usize) {
        self.lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_alt_tex_index3d(alt_tex, index3d)
    }

    fn set_model_nif(&mut self, model_rec: RecordHandle, nif_path: &str) {
        self.lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_model_nif(model_rec, nif_path)
    }

    fn used_form_ids(&self) -> HashSet<u32> {
        self.lock().unwrap_or_else(|e| e.into_inner()).used_form_ids()
    }

    fn save_plugin(&self, output_dir: &Path, esmify: bool) -> Result<()> {
        self.lock()
            .unwrap_or_else(|e| e.into_inner())
            .save_plugin(output_dir, esmify)
    }
}

/// In-memory record store: the pipeline's view of the load order, populated
/// by tests and by the (out-of-scope) plugin importer.
#[derive(Default)]
pub struct MemoryRecordStore {
    models: Vec<ModelRecord>,
    txsts: Vec<TxstData>,
    alt_textures: Vec<AltTexData>,
    /// (nif path, 3D index) -> alt tex handles, built once by
    /// populate_objects; later index rewrites do not reindex
    by_nif: HashMap<(String, usize), Vec<RecordHandle>>,
}

struct ModelRecord {
    nif_path: String,
    match_type: String,
}

struct TxstData {
    slots: TextureSet,
    edid: String,
    form_id: u32,
    created: bool,
}

struct AltTexData {
    model_rec: RecordHandle,
    txst: RecordHandle,
    index3d: usize,
    source_mod: String,
    form_id: u32,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model(&mut self, nif_path: &str, match_type: &str) -> RecordHandle {
        self.models.push(ModelRecord {
            nif_path: util::canonicalize_path(nif_path),
            match_type: match_type.to_string(),
        });
        self.models.len() - 1
    }

    pub fn add_txst(&mut self, slots: TextureSet, edid: &str, form_id: u32) -> RecordHandle {
        self.txsts.push(TxstData {
            slots,
            edid: edid.to_string(),
            form_id,
            created: false,
        });
        self.txsts.len() - 1
    }

    pub fn add_alt_texture(
        &mut self,
        model_rec: RecordHandle,
        txst: RecordHandle,
        index3d: usize,
        source_mod: &str,
        form_id: u32,
    ) -> RecordHandle {
        self.alt_textures.push(AltTexData {
            model_rec,
            txst,
            index3d,
            source_mod: source_mod.to_string(),
            form_id,
        });
        self.alt_textures.len() - 1
    }

    pub fn model_nif_path(&self, model_rec: RecordHandle) -> &str {
        &self.models[model_rec].nif_path
    }

    pub fn alt_tex_txst(&self, alt_tex: RecordHandle) -> RecordHandle {
        self.alt_textures[alt_tex].txst
    }

    pub fn alt_tex_index3d(&self, alt_tex: RecordHandle) -> usize {
        self.alt_textures[alt_tex].index3d
    }

    pub fn alt_tex_txst_slots(&self, alt_tex: RecordHandle) -> TextureSet {
        self.txsts[self.alt_textures[alt_tex].txst].slots.clone()
    }

    pub fn txst_edid(&self, txst: RecordHandle) -> &str {
        &self.txsts[txst].edid
    }
}

impl RecordStore for MemoryRecordStore {
    fn initialize(&mut self, _game_plugins: &[String]) -> Result<()> {
        Ok(())
    }

    fn populate_objects(&mut self) -> Result<()> {
        self.by_nif.clear();
        for (handle, alt_tex) in self.alt_textures.iter().enumerate() {
            let nif_path = self.models[alt_tex.model_rec].nif_path.clone();
            self.by_nif.entry((nif_path, alt_tex.index3d)).or_default().push(handle);
        }
        Ok(())
    }

    fn matching_alt_textures(&self, nif_path: &str, index3d: usize) -> Vec<AltTexInfo> {
        let canonical = util::canonicalize_path(nif_path);
        let Some(handles) = self.by_nif.get(&(canonical, index3d)) else {
            return Vec::new();
        };

        handles
            .iter()
            .map(|handle| {
                let alt_tex = &self.alt_textures[*handle];
                let model = &self.models[alt_tex.model_rec];
                AltTexInfo {
                    alt_tex: *handle,
                    txst: alt_tex.txst,
                    model_rec: alt_tex.model_rec,
                    matched_nif: model.nif_path.clone(),
                    match_type: model.match_type.clone(),
                    alt_tex_mod: alt_tex.source_mod.clone(),
                    alt_tex_form_id: alt_tex.form_id,
                }
            })
            .collect()
    }

    fn txst_slots(&self, txst: RecordHandle) -> TextureSet {
        self.txsts[txst].slots.clone()
    }

    fn create_txst(&mut self, slots: &TextureSet, edid: &str, form_id: u32) -> RecordHandle {
        self.txsts.push(TxstData {
            slots: slots.clone(),
            edid: edid.to_string(),
            form_id,
            created: true,
        });
        self.txsts.len() - 1
    }

    fn set_alt_tex_txst(&mut self, alt_tex: RecordHandle, txst: RecordHandle) {
        self.alt_textures[alt_tex].txst = txst;
    }

    fn set_alt_tex_index3d(&mut self, alt_tex: RecordHandle, index3d: usize) {
        self.alt_textures[alt_tex].index3d = index3d;
    }

    fn set_model_nif(&mut self, model_rec: RecordHandle, nif_path: &str) {
        self.models[model_rec].nif_path = util::canonicalize_path(nif_path);
    }

    fn used_form_ids(&self) -> HashSet<u32> {
        self.txsts.iter().map(|t| t.form_id).collect()
    }

    fn save_plugin(&self, output_dir: &Path, esmify: bool) -> Result<()> {
        let records: Vec<TxstRecord> = self
            .txsts
            .iter()
            .filter(|t| t.created)
            .map(|t| TxstRecord {
                form_id: t.form_id,
                edid: t.edid.clone(),
                slots: t.slots.clone(),
            })
            .collect();

        let descriptor = PluginDescriptor {
            esm: esmify,
            ..Default::default()
        };
        let bytes = EspWriter::write(&descriptor, &records)?;
        std::fs::create_dir_all(output_dir)?;
        std::fs::write(output_dir.join(PLUGIN_NAME), bytes)?;
        Ok(())
    }
}
