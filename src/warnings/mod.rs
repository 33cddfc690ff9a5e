//! De-duplicated cross-mod warnings: a matched texture used together with a
//! diffuse/normal (or a mesh) from a different mod is worth one warning per
//! mod pair, not one per shape.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::modmanager::ModManagerDirectory;
use crate::util::logger;
use crate::vfs::Vfs;

#[derive(Default)]
pub struct Warnings {
    /// matched mod -> set of base-texture mods it was combined with
    mismatch: Mutex<HashMap<String, HashSet<String>>>,
    /// (matched mod, mesh mod) pairs already reported
    mesh: Mutex<HashSet<(String, String)>>,
    /// exact (matched path, base path) pairs for the debug log
    mismatch_debug: Mutex<HashSet<(String, String)>>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a texture matched from one mod being bound next to a base
    /// texture owned by another.
    pub fn mismatch(&self, vfs: &Vfs, mmd: &ModManagerDirectory, matched_path: &str, base_tex: &str) {
        let (Some(matched_mod), Some(base_mod)) = (vfs.mod_for(mmd, matched_path), vfs.mod_for(mmd, base_tex)) else {
            return;
        };
        if matched_mod.name == base_mod.name {
            return;
        }

        {
            let mut debug = self.mismatch_debug.lock().unwrap_or_else(|e| e.into_inner());
            if debug.insert((matched_path.to_string(), base_tex.to_string())) {
                logger::debug(format!(
                    "Potential texture mismatch: {matched_path} from \"{}\" used with {base_tex} from \"{}\"",
                    matched_mod.name, base_mod.name
                ));
            }
        }

        let mut mismatch = self.mismatch.lock().unwrap_or_else(|e| e.into_inner());
        mismatch.entry(matched_mod.name.clone()).or_default().insert(base_mod.name.clone());
    }

    /// Records a texture matched from one mod applied to a mesh from
    /// another ranked mod.
    pub fn mesh(&self, vfs: &Vfs, mmd: &ModManagerDirectory, matched_path: &str, nif_path: &str) {
        let (Some(matched_mod), Some(nif_mod)) = (vfs.mod_for(mmd, matched_path), vfs.mod_for(mmd, nif_path)) else {
            return;
        };
        if matched_mod.name == nif_mod.name || nif_mod.priority() < 0 {
            return;
        }

        let key = (matched_mod.name.clone(), nif_mod.name.clone());
        let mut mesh = self.mesh.lock().unwrap_or_else(|e| e.into_inner());
        if mesh.insert(key) {
            logger::debug(format!(
                "Potential mesh mismatch: {matched_path} from \"{}\" used on {nif_path} from \"{}\"",
                matched_mod.name, nif_mod.name
            ));
        }
    }

    /// Emits the summary once the run is done.
    pub fn print(&self) {
        let mismatch = self.mismatch.lock().unwrap_or_else(|e| e.into_inner());
        if mismatch.is_empty() {
            return;
        }

        logger::warn(
            "Potential texture mismatches were found; there may be visual issues. Verify each warning and re-run if needed.",
        );
        let mut matched_mods: Vec<_> = mismatch.iter().collect();
        matched_mods.sort_by_key(|(name, _)| name.clone());
        for (matched_mod, base_mods) in matched_mods {
            logger::warn(format!("\"{matched_mod}\" assets are used with:"));
            let mut base_mods: Vec<_> = base_mods.iter().collect();
            base_mods.sort();
            for base_mod in base_mods {
                logger::warn(format!("  - diffuse/normal textures from \"{base_mod}\""));
            }
        }
    }

}
