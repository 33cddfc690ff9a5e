//! Persistent per-file caches keyed by canonical path. An entry is valid
//! only when its recorded mtime matches the VFS and the cache was written by
//! this build (version invalidation).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use serde_json::{Map, Value};

use crate::util::logger;
use crate::vfs::Vfs;

pub const PG_VERSION: &str = env!("CARGO_PKG_VERSION");

const NIF_CACHE_FILE: &str = "nifCache.json";
const TEX_CACHE_FILE: &str = "texCache.json";
const TXST_CACHE_FILE: &str = "txstFormIDs.json";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CacheKind {
    Nif,
    Tex,
}

pub struct PgCache {
    cache_dir: PathBuf,
    enabled: bool,
    nif: Mutex<Map<String, Value>>,
    tex: Mutex<Map<String, Value>>,
}

impl PgCache {
    pub fn new(cache_dir: PathBuf, enabled: bool) -> Self {
        Self {
            cache_dir,
            enabled,
            nif: Mutex::new(Map::new()),
            tex: Mutex::new(Map::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn load(&self) {
        if !self.enabled {
            return;
        }
        Self::load_file(&self.cache_dir.join(NIF_CACHE_FILE), &self.nif);
        Self::load_file(&self.cache_dir.join(TEX_CACHE_FILE), &self.tex);
    }

    fn load_file(path: &Path, target: &Mutex<Map<String, Value>>) {
        let Ok(raw) = fs::read_to_string(path) else {
            return;
        };
        let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&raw) else {
            logger::debug(format!("Discarding unreadable cache file {}", path.display()));
            return;
        };

        // version mismatch invalidates the whole file
        if object.get("version").and_then(Value::as_str) != Some(PG_VERSION) {
            logger::debug(format!("Discarding cache from another build: {}", path.display()));
            return;
        }

        *target.lock().unwrap_or_else(|e| e.into_inner()) = object;
    }

    pub fn save(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        fs::create_dir_all(&self.cache_dir)?;
        Self::save_file(&self.cache_dir.join(NIF_CACHE_FILE), &self.nif)?;
        Self::save_file(&self.cache_dir.join(TEX_CACHE_FILE), &self.tex)?;
        Ok(())
    }

    fn save_file(path: &Path, source: &Mutex<Map<String, Value>>) -> Result<()> {
        let mut object = source.lock().unwrap_or_else(|e| e.into_inner()).clone();
        object.insert("version".to_string(), Value::from(PG_VERSION));
        fs::write(path, serde_json::to_string_pretty(&Value::Object(object))?)?;
        Ok(())
    }

    fn get(&self, vfs: &Vfs, kind: CacheKind, canonical_path: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }

        let store = match kind {
            CacheKind::Nif => &self.nif,
            CacheKind::Tex => &self.tex,
        };
        let entry = store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(canonical_path)
            .cloned()?;

        // invalidate on missing file or mtime drift
        let recorded = entry.get("mtime").and_then(Value::as_u64)?;
        let current = vfs.mtime(canonical_path)?;
        if recorded != current {
            return None;
        }

        Some(entry)
    }

    fn set(&self, vfs: &Vfs, kind: CacheKind, canonical_path: &str, mut entry: Value) {
        if !self.enabled {
            return;
        }
        let Some(object) = entry.as_object_mut() else {
            return;
        };
        if !object.contains_key("mtime") {
            let Some(mtime) = vfs.mtime(canonical_path) else {
                return;
            };
            object.insert("mtime".to_string(), Value::from(mtime));
        }

        let store = match kind {
            CacheKind::Nif => &self.nif,
            CacheKind::Tex => &self.tex,
        };
        store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(canonical_path.to_string(), entry);
    }

    pub fn get_nif(&self, vfs: &Vfs, canonical_path: &str) -> Option<Value> {
        self.get(vfs, CacheKind::Nif, canonical_path)
    }

    pub fn set_nif(&self, vfs: &Vfs, canonical_path: &str, entry: Value) {
        self.set(vfs, CacheKind::Nif, canonical_path, entry);
    }

    pub fn get_tex(&self, vfs: &Vfs, canonical_path: &str) -> Option<Value> {
        self.get(vfs, CacheKind::Tex, canonical_path)
    }

    pub fn set_tex(&self, vfs: &Vfs, canonical_path: &str, entry: Value) {
        self.set(vfs, CacheKind::Tex, canonical_path, entry);
    }

    /// The TXST form-id cache is not mtime keyed; it maps stable record
    /// cache keys to previously allocated form ids.
    pub fn load_txst_form_ids(&self) -> std::collections::HashMap<String, u32> {
        if !self.enabled {
            return Default::default();
        }
        let Ok(raw) = fs::read_to_string(self.cache_dir.join(TXST_CACHE_FILE)) else {
            return Default::default();
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }

    pub fn save_txst_form_ids(&self, form_ids: &std::collections::HashMap<String, u32>) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        fs::create_dir_all(&self.cache_dir)?;
        fs::write(
            self.cache_dir.join(TXST_CACHE_FILE),
            serde_json::to_string_pretty(form_ids)?,
        )?;
        Ok(())
    }
}
