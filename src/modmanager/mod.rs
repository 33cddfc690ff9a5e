//! Mod-manager awareness: which file belongs to which mod, and the priority
//! order that decides conflicts. Two real backends (Mod Organizer 2 and
//! Vortex) plus a null backend that lumps everything into one anonymous mod.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use walkdir::WalkDir;

use crate::textures::ShapeShader;
use crate::util;
use crate::util::logger;

/// Priority value of a mod that has not been ranked yet. Unranked mods lose
/// every conflict.
pub const UNRANKED_PRIORITY: i32 = -1;

#[derive(Debug, Copy, Clone, PartialEq, Eq, clap::ValueEnum)]
pub enum ModManagerType {
    None,
    ModOrganizer2,
    Vortex,
}

#[derive(Debug, Default)]
pub struct ModState {
    pub enabled: bool,
    pub priority: i32,
    pub is_new: bool,
    pub mod_manager_order: i32,
    pub shaders: std::collections::HashSet<ShapeShader>,
    pub conflicts: std::collections::HashSet<String>,
}

/// Identity is by name; everything mutable sits behind the state lock so the
/// dry-run phase can record observations from worker threads.
#[derive(Debug)]
pub struct Mod {
    pub name: String,
    pub state: RwLock<ModState>,
}

impl Mod {
    fn new(name: &str, enabled: bool, priority: i32) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: RwLock::new(ModState {
                enabled,
                priority,
                is_new: true,
                mod_manager_order: UNRANKED_PRIORITY,
                ..Default::default()
            }),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.state.read().unwrap_or_else(|e| e.into_inner()).enabled
    }

    pub fn priority(&self) -> i32 {
        self.state.read().unwrap_or_else(|e| e.into_inner()).priority
    }
}

/// Subfolders of a mod that can shadow game data.
const FOLDERS_TO_MAP: &[&str] = &["textures", "meshes"];

const MO2_INI_PROFILES_KEY: &str = "profiles_directory=";
const MO2_INI_MODS_KEY: &str = "mod_directory=";
const MO2_INI_BASE_KEY: &str = "base_directory=";
const MO2_BASE_DIR_WILDCARD: &str = "%BASE_DIR%";

#[derive(Debug, Deserialize)]
struct VortexDeployment {
    files: Vec<VortexFile>,
}

#[derive(Debug, Deserialize)]
struct VortexFile {
    #[serde(rename = "relPath")]
    rel_path: String,
    source: String,
}

#[derive(Debug, Default)]
pub struct ModManagerDirectory {
    mods: HashMap<String, Arc<Mod>>,
    file_map: HashMap<String, Arc<Mod>>,
}

impl ModManagerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mod_by_name(&self, name: &str) -> Option<Arc<Mod>> {
        self.mods.get(name).cloned()
    }

    pub fn mod_for_file(&self, canonical_path: &str) -> Option<Arc<Mod>> {
        self.file_map.get(canonical_path).cloned()
    }

    pub fn mods(&self) -> Vec<Arc<Mod>> {
        let mut mods: Vec<_> = self.mods.values().cloned().collect();
        mods.sort_by(|a, b| a.name.cmp(&b.name));
        mods
    }

    pub fn file_map(&self) -> &HashMap<String, Arc<Mod>> {
        &self.file_map
    }

    /// Null backend: every file belongs to a single anonymous mod at
    /// priority zero.
    pub fn populate_none(&mut self) {
        let anon = Mod::new("", true, 0);
        self.mods.insert(String::new(), anon);
    }

    /// Registers a mod directly, the write path of the sort UI (and of
    /// tests that do not want a manager install on disk).
    pub fn add_mod(&mut self, name: &str, enabled: bool, priority: i32) -> Arc<Mod> {
        let mod_ptr = Mod::new(name, enabled, priority);
        self.mods.insert(name.to_string(), mod_ptr.clone());
        mod_ptr
    }

    /// Assigns ownership of a canonical path to a mod. First writer wins,
    /// matching the population order rule of the real backends.
    pub fn assign_file(&mut self, canonical_path: &str, mod_ptr: &Arc<Mod>) {
        self.file_map
            .entry(util::canonicalize_path(canonical_path))
            .or_insert_with(|| mod_ptr.clone());
    }

    pub fn anonymous_mod(&self) -> Option<Arc<Mod>> {
        self.mods.get("").cloned()
    }

    /// Reads an MO2 instance: modorganizer.ini for the folder layout, then
    /// the profile's modlist.txt for enabled mods and their order (top of
    /// the list is the lowest priority).
    pub fn populate_mo2(
        &mut self,
        instance_dir: &Path,
        profile: &str,
        output_dir: &Path,
        use_mm_order: bool,
    ) -> Result<()> {
        logger::info("Populating mods from Mod Organizer 2");

        let (profiles_dir, mods_dir) = Self::mo2_file_paths(instance_dir)?;

        let modlist_path = profiles_dir.join(profile).join("modlist.txt");
        let modlist = fs::read_to_string(&modlist_path)
            .with_context(|| format!("Mod Organizer 2 modlist.txt does not exist: {}", modlist_path.display()))?;

        let mut base_priority = 0i32;
        let mut found_one_mod = false;

        for line in modlist.lines() {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('-') || line.starts_with('*') || line.starts_with('#') {
                continue;
            }
            if line.ends_with("_separator") {
                continue;
            }
            let Some(mod_name) = line.strip_prefix('+') else {
                continue;
            };

            let mod_dir = mods_dir.join(mod_name);
            if !mod_dir.is_dir() {
                logger::warn(format!(
                    "Mod directory from modlist.txt does not exist: {}",
                    mod_dir.display()
                ));
                continue;
            }

            if paths_equivalent(&mod_dir, output_dir) {
                bail!(
                    "If outputting to MO2 you must disable the mod {mod_name} first to prevent issues with the MO2 VFS"
                );
            }

            found_one_mod = true;

            let mod_ptr = self
                .mods
                .entry(mod_name.to_string())
                .or_insert_with(|| Mod::new(mod_name, true, UNRANKED_PRIORITY))
                .clone();

            {
                let mut state = mod_ptr.state.write().unwrap_or_else(|e| e.into_inner());
                state.enabled = true;
                state.mod_manager_order = base_priority;
                if use_mm_order {
                    state.priority = base_priority;
                }
            }
            base_priority += 1;

            self.map_mod_files(&mod_dir, &mod_ptr);
        }

        if !found_one_mod {
            bail!("MO2 modlist.txt was empty, no mods found");
        }

        if use_mm_order {
            // bottom of modlist.txt is the winner: invert
            for mod_ptr in self.mods.values() {
                let mut state = mod_ptr.state.write().unwrap_or_else(|e| e.into_inner());
                if state.priority != UNRANKED_PRIORITY {
                    state.priority = base_priority - state.priority - 1;
                }
            }
        }

        Ok(())
    }

    fn map_mod_files(&mut self, mod_dir: &Path, mod_ptr: &Arc<Mod>) {
        for folder in FOLDERS_TO_MAP {
            let search_dir = mod_dir.join(folder);
            if !search_dir.is_dir() {
                continue;
            }

            for entry in WalkDir::new(&search_dir).follow_links(false).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry.file_name().eq_ignore_ascii_case("meta.ini") {
                    continue;
                }

                let Ok(rel) = entry.path().strip_prefix(mod_dir) else {
                    continue;
                };
                let canonical = util::canonicalize_path(&rel.to_string_lossy());

                // first writer wins: earlier mods in the configured order own
                // duplicated files
                if self.file_map.contains_key(&canonical) {
                    continue;
                }

                logger::trace(format!("Mod file map: {canonical} -> {}", mod_ptr.name));
                self.file_map.insert(canonical, mod_ptr.clone());
            }
        }

        // root-level archives belong to the mod as well
        if let Ok(read_dir) = fs::read_dir(mod_dir) {
            for entry in read_dir.filter_map(|e| e.ok()) {
                let path = entry.path();
                let is_bsa = path
                    .extension()
                    .map(|e| e.eq_ignore_ascii_case("bsa"))
                    .unwrap_or(false);
                if !path.is_file() || !is_bsa {
                    continue;
                }
                let canonical = util::canonicalize_path(&entry.file_name().to_string_lossy());
                self.file_map.entry(canonical).or_insert_with(|| mod_ptr.clone());
            }
        }
    }

    /// Locates the profiles and mods folders from modorganizer.ini,
    /// unwrapping `@ByteArray(...)` values and substituting `%BASE_DIR%`.
    /// Missing fields fall back to `<instance>/profiles` and
    /// `<instance>/mods`.
    fn mo2_file_paths(instance_dir: &Path) -> Result<(PathBuf, PathBuf)> {
        let ini_path = instance_dir.join("modorganizer.ini");
        let ini = fs::read_to_string(&ini_path)
            .with_context(|| format!("Mod Organizer 2 ini file does not exist: {}", ini_path.display()))?;

        let mut profiles_field = String::new();
        let mut mods_field = String::new();
        let mut base_field = String::new();

        for line in ini.lines() {
            if let Some(value) = line.strip_prefix(MO2_INI_PROFILES_KEY) {
                profiles_field = decode_ini_value(value);
            } else if let Some(value) = line.strip_prefix(MO2_INI_MODS_KEY) {
                mods_field = decode_ini_value(value);
            } else if let Some(value) = line.strip_prefix(MO2_INI_BASE_KEY) {
                base_field = decode_ini_value(value);
            }
        }

        if base_field.is_empty() {
            base_field = instance_dir.to_string_lossy().into_owned();
        }

        let profiles_dir = if profiles_field.is_empty() {
            instance_dir.join("profiles")
        } else {
            PathBuf::from(profiles_field.replace(MO2_BASE_DIR_WILDCARD, &base_field))
        };
        let mods_dir = if mods_field.is_empty() {
            instance_dir.join("mods")
        } else {
            PathBuf::from(mods_field.replace(MO2_BASE_DIR_WILDCARD, &base_field))
        };

        Ok((profiles_dir, mods_dir))
    }

    /// Reads a Vortex deployment manifest. Vortex has no inherent order, so
    /// every mod starts unranked.
    pub fn populate_vortex(&mut self, deployment_dir: &Path) -> Result<()> {
        logger::info("Populating mods from Vortex");

        let deployment_path = deployment_dir.join("vortex.deployment.json");
        let raw = fs::read_to_string(&deployment_path)
            .with_context(|| format!("Vortex deployment file does not exist: {}", deployment_path.display()))?;
        let deployment: VortexDeployment =
            serde_json::from_str(&raw).with_context(|| "Vortex deployment file is not valid JSON")?;

        for file in deployment.files {
            let canonical = util::canonicalize_path(&file.rel_path);

            let (first, _) = util::split_first_component(&canonical);
            let is_bsa = canonical.ends_with(".bsa");
            if !is_bsa && !FOLDERS_TO_MAP.contains(&first) {
                continue;
            }

            let mod_name = strip_vortex_suffix(&file.source);
            let mod_ptr = self
                .mods
                .entry(mod_name.clone())
                .or_insert_with(|| {
                    let m = Mod::new(&mod_name, true, UNRANKED_PRIORITY);
                    m.state.write().unwrap_or_else(|e| e.into_inner()).mod_manager_order = 0;
                    m
                })
                .clone();

            logger::trace(format!("Mod file map: {canonical} -> {}", mod_ptr.name));
            self.file_map.insert(canonical, mod_ptr);
        }

        Ok(())
    }

    /// Applies a persisted `{mod name -> priority}` object, the write-back
    /// path of the sort dialog.
    pub fn load_priorities(&mut self, priorities: &serde_json::Value) -> Result<()> {
        let Some(object) = priorities.as_object() else {
            bail!("mod priority JSON is not an object");
        };

        for (name, priority) in object {
            if name.is_empty() {
                continue;
            }
            let Some(priority) = priority.as_i64() else {
                bail!("mod priority for {name} is not an integer");
            };

            let mod_ptr = self
                .mods
                .entry(name.clone())
                .or_insert_with(|| Mod::new(name, true, UNRANKED_PRIORITY));
            let mut state = mod_ptr.state.write().unwrap_or_else(|e| e.into_inner());
            state.is_new = false;
            state.priority = priority as i32;
        }

        Ok(())
    }

    pub fn priorities_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (name, mod_ptr) in &self.mods {
            if name.is_empty() {
                continue;
            }
            let priority = mod_ptr.priority();
            if priority != UNRANKED_PRIORITY {
                object.insert(name.clone(), serde_json::Value::from(priority));
            }
        }
        serde_json::Value::Object(object)
    }
}

fn decode_ini_value(value: &str) -> String {
    let value = value.trim();
    if let Some(inner) = value.strip_prefix("@ByteArray(").and_then(|v| v.strip_suffix(')')) {
        return inner.replace("\\\\", "\\");
    }
    value.to_string()
}

/// Vortex appends `-<id>-<version>` to the staging folder name; strip it to
/// recover the display name. Heuristic: a mod whose real name contains a
/// hyphenated number gets truncated too.
fn strip_vortex_suffix(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'-' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == b'-' {
                return source[..i].to_string();
            }
        }
        i += 1;
    }
    source.to_string()
}

fn paths_equivalent(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vortex_suffix_stripping() {
        assert_eq!(strip_vortex_suffix("Better Rocks-1234-1-0"), "Better Rocks");
        assert_eq!(strip_vortex_suffix("Plain Name"), "Plain Name");
        // the documented heuristic misfire: a real hyphenated number in the
        // middle of a name truncates as well
        assert_eq!(strip_vortex_suffix("Mod-2-electric boogaloo"), "Mod");
        assert_eq!(strip_vortex_suffix("Trailing-123"), "Trailing-123");
    }

    #[test]
    fn ini_value_decoding() {
        assert_eq!(decode_ini_value("C:/Mods"), "C:/Mods");
        assert_eq!(decode_ini_value("@ByteArray(D:\\\\MO2\\\\mods)"), "D:\\MO2\\mods");
    }

    #[test]
    fn mo2_population_orders_and_maps() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let instance = dir.path();

        fs::create_dir_all(instance.join("profiles").join("Default"))?;
        fs::create_dir_all(instance.join("mods").join("ModA").join("textures"))?;
        fs::create_dir_all(instance.join("mods").join("ModB").join("textures"))?;
        fs::write(instance.join("modorganizer.ini"), "[General]\n")?;
        fs::write(
            instance.join("mods").join("ModA").join("textures").join("rock_p.dds"),
            b"a",
        )?;
        fs::write(
            instance.join("mods").join("ModB").join("textures").join("rock_p.dds"),
            b"b",
        )?;
        fs::write(
            instance.join("profiles").join("Default").join("modlist.txt"),
            "# comment\n+ModB\n-Disabled\n+ModA\nSome_separator\n",
        )?;

        let mut mmd = ModManagerDirectory::new();
        let output = dir.path().join("output");
        mmd.populate_mo2(instance, "Default", &output, true)?;

        // top of the list (ModB) is the lowest priority after inversion
        let mod_a = mmd.mod_by_name("ModA").unwrap();
        let mod_b = mmd.mod_by_name("ModB").unwrap();
        assert_eq!(mod_a.priority(), 0);
        assert_eq!(mod_b.priority(), 1);
        assert!(mmd.mod_by_name("Disabled").is_none());

        // first writer wins on duplicated files: ModB is listed first
        let owner = mmd.mod_for_file("textures\\rock_p.dds").unwrap();
        assert_eq!(owner.name, "ModB");
        Ok(())
    }

    #[test]
    fn mo2_output_dir_inside_mods_is_fatal() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let instance = dir.path();
        fs::create_dir_all(instance.join("profiles").join("Default"))?;
        fs::create_dir_all(instance.join("mods").join("PGOutput"))?;
        fs::write(instance.join("modorganizer.ini"), "")?;
        fs::write(
            instance.join("profiles").join("Default").join("modlist.txt"),
            "+PGOutput\n",
        )?;

        let mut mmd = ModManagerDirectory::new();
        let output = instance.join("mods").join("PGOutput");
        assert!(mmd.populate_mo2(instance, "Default", &output, false).is_err());
        Ok(())
    }

    #[test]
    fn vortex_population_maps_sources() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let deployment = serde_json::json!({
            "files": [
                {"relPath": "Textures/Rock/rock_p.dds", "source": "Rock Overhaul-100-2-1"},
                {"relPath": "SKSE/plugin.dll", "source": "Some SKSE Mod-5-0"},
                {"relPath": "archive.bsa", "source": "Archive Mod-7-1"}
            ]
        });
        fs::write(
            dir.path().join("vortex.deployment.json"),
            serde_json::to_string(&deployment)?,
        )?;

        let mut mmd = ModManagerDirectory::new();
        mmd.populate_vortex(dir.path())?;

        let owner = mmd.mod_for_file("textures\\rock\\rock_p.dds").unwrap();
        assert_eq!(owner.name, "Rock Overhaul");
        assert_eq!(owner.priority(), UNRANKED_PRIORITY);

        // non-asset folders are not mapped, archives are
        assert!(mmd.mod_for_file("skse\\plugin.dll").is_none());
        assert!(mmd.mod_for_file("archive.bsa").is_some());
        Ok(())
    }
}
