//! The single shared-state value of a run. Built once at startup and handed
//! to every task by reference; anything mutable inside is an explicit
//! concurrent container.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;

use crate::cache::PgCache;
use crate::diag::Diag;
use crate::gpu::GpuService;
use crate::modmanager::{Mod, ModManagerDirectory};
use crate::output::{DiffEntry, OutputManager};
use crate::patchers::shader_true_pbr::PbrConfig;
use crate::plugin::PluginPatcher;
use crate::settings::PatcherConfig;
use crate::textures::{ShapeShader, TextureMappings, TextureSet};
use crate::vfs::Vfs;
use crate::warnings::Warnings;

pub struct PgContext {
    pub config: PatcherConfig,
    pub vfs: Vfs,
    pub mmd: ModManagerDirectory,
    pub gpu: GpuService,
    /// Frozen after classification; generated textures append through the
    /// write lock during mesh patching.
    pub textures: RwLock<TextureMappings>,
    pub warnings: Warnings,
    pub diff: Mutex<BTreeMap<String, DiffEntry>>,
    pub cache: PgCache,
    pub diag: Diag,
    pub output: OutputManager,
    pub plugin: Option<PluginPatcher>,
    /// True PBR patcher configs, loaded once after VFS population.
    pub pbr_configs: Vec<PbrConfig>,
    /// `(nif path, shape block id) -> (original slots, applied slots,
    /// applied shader)`, so the plugin patcher can ask what a shape ended up
    /// with without re-decoding the mesh.
    pub patched_sets: DashMap<(String, usize), (TextureSet, TextureSet, ShapeShader)>,
}

impl PgContext {
    pub fn mod_for(&self, canonical_path: &str) -> Option<Arc<Mod>> {
        self.vfs.mod_for(&self.mmd, canonical_path)
    }

    pub fn record_diff(&self, canonical_path: &str, entry: DiffEntry) {
        self.diff
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(canonical_path.to_string(), entry);
    }

    pub fn diff_snapshot(&self) -> BTreeMap<String, DiffEntry> {
        self.diff.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
