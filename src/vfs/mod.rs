//! The virtual file system: one case-insensitive view over loose data files
//! and archive contents, with per-file provenance (backing location plus
//! owning mod). Frozen after population; files the pipeline generates are
//! appended through a concurrent side map.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use itertools::Itertools;
use walkdir::WalkDir;

use crate::modmanager::{Mod, ModManagerDirectory};
use crate::util;
use crate::util::logger;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOrigin {
    Loose { abs_path: PathBuf },
    Archive { archive_id: usize, internal: String },
    Generated { abs_path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub canonical_path: String,
    pub origin: FileOrigin,
}

struct LoadedArchive {
    /// Archive file name (canonical, no directory), e.g. `textures.bsa`.
    name: String,
    archive: bsa::Archive,
    /// canonical internal path -> entry index
    index: HashMap<String, usize>,
    mtime: u64,
}

pub struct Vfs {
    data_dir: PathBuf,
    /// Where generated files land; needed to read them back.
    generated_dir: PathBuf,
    file_map: HashMap<String, FileEntry>,
    generated: DashMap<String, Option<Arc<Mod>>>,
    archives: Vec<LoadedArchive>,
}

impl Vfs {
    pub fn new(data_dir: PathBuf, generated_dir: PathBuf) -> Self {
        Self {
            data_dir,
            generated_dir,
            file_map: HashMap::new(),
            generated: DashMap::new(),
            archives: Vec::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn generated_dir(&self) -> &Path {
        &self.generated_dir
    }

    /// Scans the data directory. Loose files always shadow archived ones;
    /// between archives, the earlier archive in load order wins (the
    /// first-insert policy below), matching game convention for Bethesda
    /// archives. Load order here is the sorted archive file name list.
    pub fn populate(&mut self, include_archives: bool) -> Result<()> {
        if !self.data_dir.is_dir() {
            bail!("data directory does not exist: {}", self.data_dir.display());
        }

        logger::info(format!("Scanning data directory {}", self.data_dir.display()));

        for entry in WalkDir::new(&self.data_dir).follow_links(false).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.data_dir) else {
                continue;
            };

            let canonical = util::canonicalize_path(&rel.to_string_lossy());
            self.file_map.insert(
                canonical.clone(),
                FileEntry {
                    canonical_path: canonical,
                    origin: FileOrigin::Loose {
                        abs_path: entry.path().to_path_buf(),
                    },
                },
            );
        }

        let loose_count = self.file_map.len();
        logger::info(format!("Indexed {loose_count} loose files"));

        if include_archives {
            self.populate_archives()?;
        }

        Ok(())
    }

    fn populate_archives(&mut self) -> Result<()> {
        // load order: root-level archives sorted by name
        let mut archive_paths: Vec<PathBuf> = Vec::new();
        let read_dir = fs::read_dir(&self.data_dir)
            .with_context(|| format!("cannot list data directory {}", self.data_dir.display()))?;
        for entry in read_dir.filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_bsa = path.extension().map(|e| e.eq_ignore_ascii_case("bsa")).unwrap_or(false);
            if path.is_file() && is_bsa {
                archive_paths.push(path);
            }
        }
        archive_paths.sort();

        for path in archive_paths {
            let archive = match bsa::Archive::open(&path) {
                Ok(archive) => archive,
                Err(err) => {
                    logger::error(format!("Failed to open archive {} (skipping): {err}", path.display()));
                    continue;
                }
            };

            let mtime = file_mtime(&path).unwrap_or(0);
            let archive_id = self.archives.len();
            let name = util::canonicalize_path(&path.file_name().unwrap_or_default().to_string_lossy());

            let mut index = HashMap::new();
            for (entry_idx, entry) in archive.entries().iter().enumerate() {
                let canonical = util::canonicalize_path(&entry.name);
                index.insert(canonical.clone(), entry_idx);

                // loose shadows archived; earlier archives shadow later
                if self.file_map.contains_key(&canonical) {
                    continue;
                }
                self.file_map.insert(
                    canonical.clone(),
                    FileEntry {
                        canonical_path: canonical.clone(),
                        origin: FileOrigin::Archive {
                            archive_id,
                            internal: canonical,
                        },
                    },
                );
            }

            logger::debug(format!("Indexed archive {name} ({} entries)", archive.entries().len()));
            self.archives.push(LoadedArchive {
                name,
                archive,
                index,
                mtime,
            });
        }

        Ok(())
    }

    pub fn lookup(&self, canonical_path: &str) -> Option<FileEntry> {
        if self.generated.contains_key(canonical_path) {
            return Some(FileEntry {
                canonical_path: canonical_path.to_string(),
                origin: FileOrigin::Generated {
                    abs_path: self.generated_abs_path(canonical_path),
                },
            });
        }
        self.file_map.get(canonical_path).cloned()
    }

    pub fn is_file(&self, canonical_path: &str) -> bool {
        self.file_map.contains_key(canonical_path) || self.generated.contains_key(canonical_path)
    }

    pub fn is_generated(&self, canonical_path: &str) -> bool {
        self.generated.contains_key(canonical_path)
    }

    fn generated_abs_path(&self, canonical_path: &str) -> PathBuf {
        let mut path = self.generated_dir.clone();
        for component in canonical_path.split('\\') {
            path.push(component);
        }
        path
    }

    pub fn read_bytes(&self, canonical_path: &str) -> Result<Vec<u8>> {
        let entry = self
            .lookup(canonical_path)
            .with_context(|| format!("file not found in VFS: {canonical_path}"))?;

        match &entry.origin {
            FileOrigin::Loose { abs_path } | FileOrigin::Generated { abs_path } => {
                fs::read(abs_path).with_context(|| format!("cannot read {}", abs_path.display()))
            }
            FileOrigin::Archive { archive_id, internal } => {
                let loaded = self
                    .archives
                    .get(*archive_id)
                    .with_context(|| format!("archive id {archive_id} out of range"))?;
                let entry_idx = loaded
                    .index
                    .get(internal)
                    .with_context(|| format!("archive entry missing: {internal}"))?;
                loaded
                    .archive
                    .read_file(&loaded.archive.entries()[*entry_idx])
                    .with_context(|| format!("cannot extract {internal} from {}", loaded.name))
            }
        }
    }

    /// Modification time in seconds since the epoch; an archived file
    /// reports its archive's mtime.
    pub fn mtime(&self, canonical_path: &str) -> Option<u64> {
        let entry = self.lookup(canonical_path)?;
        match &entry.origin {
            FileOrigin::Loose { abs_path } | FileOrigin::Generated { abs_path } => file_mtime(abs_path),
            FileOrigin::Archive { archive_id, .. } => self.archives.get(*archive_id).map(|a| a.mtime),
        }
    }

    /// Registers a file the patcher itself produced. Idempotent; refuses to
    /// overlay a path that already has a non-generated origin.
    pub fn add_generated(&self, canonical_path: &str, owning_mod: Option<Arc<Mod>>) -> Result<()> {
        if self.generated.contains_key(canonical_path) {
            return Ok(());
        }
        if self.file_map.contains_key(canonical_path) {
            bail!("generated file shadows an existing entry: {canonical_path}");
        }
        self.generated.insert(canonical_path.to_string(), owning_mod);
        Ok(())
    }

    /// Owning mod: generated files inherit the mod recorded at generation
    /// time, everything else resolves through the mod directory, falling
    /// back to the anonymous mod where configured.
    pub fn mod_for(&self, mmd: &ModManagerDirectory, canonical_path: &str) -> Option<Arc<Mod>> {
        if let Some(generated) = self.generated.get(canonical_path) {
            if let Some(owner) = generated.value() {
                return Some(owner.clone());
            }
        }
        mmd.mod_for_file(canonical_path).or_else(|| mmd.anonymous_mod())
    }

    /// True when the path's backing archive is one of `archive_names`
    /// (canonical archive file names). Used for the vanilla-archive
    /// exclusion rules.
    pub fn is_file_in_archives(&self, canonical_path: &str, archive_names: &[String]) -> bool {
        let Some(entry) = self.file_map.get(canonical_path) else {
            return false;
        };
        let FileOrigin::Archive { archive_id, .. } = &entry.origin else {
            return false;
        };
        let Some(loaded) = self.archives.get(*archive_id) else {
            return false;
        };
        archive_names.iter().any(|name| loaded.name == util::canonicalize_path(name))
    }

    /// Canonical paths of every indexed file with the given prefix and
    /// extension, sorted for deterministic scheduling.
    pub fn files_with(&self, prefix: &str, extension: &str) -> Vec<String> {
        self.file_map
            .keys()
            .filter(|k| k.starts_with(prefix) && k.ends_with(extension))
            .cloned()
            .sorted()
            .collect_vec()
    }

    pub fn meshes(&self) -> Vec<String> {
        self.files_with("meshes\\", ".nif")
    }

    pub fn textures(&self) -> Vec<String> {
        self.files_with("textures\\", ".dds")
    }
}

fn file_mtime(path: &Path) -> Option<u64> {
    let metadata = fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    modified.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup_data_dir() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(data.join("textures")).unwrap();
        (dir, data)
    }

    #[test]
    fn loose_files_are_canonicalized() -> Result<()> {
        let (dir, data) = setup_data_dir();
        fs::write(data.join("textures").join("Rock_D.DDS"), b"loose")?;

        let mut vfs = Vfs::new(data, dir.path().join("output"));
        vfs.populate(false)?;

        // mixed-case lookups resolve through the canonical key
        let entry = vfs.lookup("textures\\rock_d.dds").unwrap();
        assert_eq!(entry.canonical_path, "textures\\rock_d.dds");
        assert_eq!(
            vfs.lookup(&util::canonicalize_path("Textures/Rock_D.DDS")).unwrap().canonical_path,
            entry.canonical_path
        );
        assert_eq!(vfs.read_bytes("textures\\rock_d.dds")?, b"loose");
        assert!(vfs.mtime("textures\\rock_d.dds").is_some());
        Ok(())
    }

    #[test]
    fn loose_shadows_archived_and_earlier_archive_wins() -> Result<()> {
        let (dir, data) = setup_data_dir();
        fs::write(data.join("textures").join("shared.dds"), b"loose")?;

        let mut builder_a = bsa::ArchiveBuilder::new();
        builder_a.add_file("textures\\shared.dds", b"archive-a".to_vec());
        builder_a.add_file("textures\\a_only.dds", b"a".to_vec());
        fs::write(data.join("a.bsa"), builder_a.build())?;

        let mut builder_b = bsa::ArchiveBuilder::new();
        builder_b.add_file("textures\\a_only.dds", b"b".to_vec());
        builder_b.add_file("textures\\b_only.dds", b"b".to_vec());
        fs::write(data.join("b.bsa"), builder_b.build())?;

        let mut vfs = Vfs::new(data, dir.path().join("output"));
        vfs.populate(true)?;

        // loose beats archive
        assert_eq!(vfs.read_bytes("textures\\shared.dds")?, b"loose");
        // a.bsa loads before b.bsa: first insert wins
        assert_eq!(vfs.read_bytes("textures\\a_only.dds")?, b"a");
        assert_eq!(vfs.read_bytes("textures\\b_only.dds")?, b"b");

        assert!(vfs.is_file_in_archives("textures\\b_only.dds", &["b.bsa".to_string()]));
        assert!(!vfs.is_file_in_archives("textures\\shared.dds", &["a.bsa".to_string()]));
        Ok(())
    }

    #[test]
    fn generated_files_are_idempotent_and_guarded() -> Result<()> {
        let (dir, data) = setup_data_dir();
        fs::write(data.join("textures").join("rock_p.dds"), b"p")?;

        let output = dir.path().join("output");
        let mut vfs = Vfs::new(data, output.clone());
        vfs.populate(false)?;

        assert!(!vfs.is_file("textures\\rock_m.dds"));
        vfs.add_generated("textures\\rock_m.dds", None)?;
        vfs.add_generated("textures\\rock_m.dds", None)?; // idempotent
        assert!(vfs.is_file("textures\\rock_m.dds"));
        assert!(vfs.is_generated("textures\\rock_m.dds"));

        // collides with a real entry
        assert!(vfs.add_generated("textures\\rock_p.dds", None).is_err());

        // readable once the backing file exists in the output tree
        fs::create_dir_all(output.join("textures"))?;
        fs::write(output.join("textures").join("rock_m.dds"), b"derived")?;
        assert_eq!(vfs.read_bytes("textures\\rock_m.dds")?, b"derived");
        Ok(())
    }

    #[test]
    fn mesh_and_texture_listings_are_sorted() -> Result<()> {
        let (dir, data) = setup_data_dir();
        fs::create_dir_all(data.join("meshes").join("b"))?;
        fs::create_dir_all(data.join("meshes").join("a"))?;
        fs::write(data.join("meshes").join("b").join("x.nif"), b"")?;
        fs::write(data.join("meshes").join("a").join("y.nif"), b"")?;
        fs::write(data.join("textures").join("t.dds"), b"")?;

        let mut vfs = Vfs::new(data, dir.path().join("output"));
        vfs.populate(false)?;

        assert_eq!(vfs.meshes(), vec!["meshes\\a\\y.nif".to_string(), "meshes\\b\\x.nif".to_string()]);
        assert_eq!(vfs.textures(), vec!["textures\\t.dds".to_string()]);
        Ok(())
    }
}
