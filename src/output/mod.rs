//! Output tree management: wiping stale output, writing patched files under
//! their canonical relative paths, the diff manifest, and the optional
//! store-only zip.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use walkdir::WalkDir;

use crate::util::logger;

pub const DIFF_JSON_NAME: &str = "ParallaxGen_Diff.json";
pub const DIAG_JSON_NAME: &str = "ParallaxGen_DIAG.json";
pub const OUTPUT_ZIP_NAME: &str = "PGPatcher_Output.zip";
pub const DYN_CUBEMAP_PATH: &str = "textures\\cubemaps\\dynamic1pxcubemap_black.dds";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub crc32original: u32,
    pub crc32patched: u32,
}

pub struct OutputManager {
    output_dir: PathBuf,
}

impl OutputManager {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Wipes previous output. Refuses to delete a directory that does not
    /// look like patcher output so a mistyped path cannot eat a mod folder.
    pub fn delete_output_dir(&self) -> Result<()> {
        if !self.output_dir.exists() {
            return Ok(());
        }

        let known_roots = ["meshes", "textures", "cache"];
        for entry in fs::read_dir(&self.output_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_lowercase();
            let recognized = if entry.path().is_dir() {
                known_roots.contains(&name.as_str())
            } else {
                name.ends_with(".json") || name.ends_with(".esp") || name.ends_with(".zip")
            };
            if !recognized {
                bail!(
                    "output directory contains unexpected entry '{}'; refusing to delete {}",
                    name,
                    self.output_dir.display()
                );
            }
        }

        logger::debug(format!("Deleting old output in {}", self.output_dir.display()));
        fs::remove_dir_all(&self.output_dir)?;
        Ok(())
    }

    pub fn is_output_empty(&self) -> bool {
        !self.output_dir.exists()
            || WalkDir::new(&self.output_dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .all(|e| !e.file_type().is_file())
    }

    fn abs_path(&self, canonical_path: &str) -> PathBuf {
        let mut path = self.output_dir.clone();
        for component in canonical_path.split('\\') {
            path.push(component);
        }
        path
    }

    /// Writes a file under its canonical relative path, creating parents.
    pub fn write_file(&self, canonical_path: &str, bytes: &[u8]) -> Result<()> {
        let path = self.abs_path(canonical_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes).with_context(|| format!("cannot write {}", path.display()))?;
        Ok(())
    }

    pub fn write_json(&self, name: &str, value: &impl Serialize) -> Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(name);
        fs::write(&path, serde_json::to_string_pretty(value)?)?;
        Ok(())
    }

    /// The 1x1 black dynamic cubemap every complex-material shape points
    /// at. Emitted from a baked-in image so the output is self-contained.
    pub fn write_dyn_cubemap(&self) -> Result<()> {
        use parallaxgen_files::dds::writer::DdsWriter;
        use parallaxgen_files::dds::{AlphaMode, DecodedImage};

        let black = DecodedImage::new(1, 1);
        let bytes = DdsWriter::write_rgba8(std::slice::from_ref(&black), AlphaMode::Opaque)?;
        self.write_file(DYN_CUBEMAP_PATH, &bytes)
    }

    /// Store-only zip of the whole output tree.
    pub fn zip_output(&self) -> Result<()> {
        let zip_path = self.output_dir.join(OUTPUT_ZIP_NAME);
        let file = fs::File::create(&zip_path)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);

        let mut entries: Vec<PathBuf> = WalkDir::new(&self.output_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p != &zip_path)
            .collect();
        entries.sort();

        for path in entries {
            let rel = path
                .strip_prefix(&self.output_dir)
                .context("zip entry outside output dir")?
                .to_string_lossy()
                .replace('\\', "/");
            zip.start_file(rel, options)?;
            zip.write_all(&fs::read(&path)?)?;
        }

        zip.finish()?;
        logger::info(format!("Wrote {}", zip_path.display()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn write_file_creates_canonical_tree() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let output = OutputManager::new(dir.path().join("out"));

        output.write_file("meshes\\clutter\\pot.nif", b"nif")?;
        assert_eq!(fs::read(dir.path().join("out").join("meshes").join("clutter").join("pot.nif"))?, b"nif");
        assert!(!output.is_output_empty());
        Ok(())
    }

    #[test]
    fn delete_refuses_foreign_directories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("out");
        fs::create_dir_all(out.join("SomeUserData"))?;

        let output = OutputManager::new(out.clone());
        assert!(output.delete_output_dir().is_err());
        assert!(out.exists());

        // recognized layout is deleted
        fs::remove_dir_all(out.join("SomeUserData"))?;
        fs::create_dir_all(out.join("meshes"))?;
        output.delete_output_dir()?;
        assert!(!out.exists());
        Ok(())
    }

    #[test]
    fn diff_json_and_zip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let output = OutputManager::new(dir.path().join("out"));
        output.write_file("meshes\\test.nif", b"patched")?;

        let mut diff = BTreeMap::new();
        diff.insert(
            "meshes\\test.nif".to_string(),
            DiffEntry {
                crc32original: 1,
                crc32patched: 2,
            },
        );
        output.write_json(DIFF_JSON_NAME, &diff)?;

        let raw = fs::read_to_string(dir.path().join("out").join(DIFF_JSON_NAME))?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        assert_eq!(value["meshes\\test.nif"]["crc32original"], 1);

        output.zip_output()?;
        assert!(dir.path().join("out").join(OUTPUT_ZIP_NAME).exists());
        Ok(())
    }

    #[test]
    fn dyn_cubemap_is_written() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let output = OutputManager::new(dir.path().join("out"));
        output.write_dyn_cubemap()?;
        assert!(dir
            .path()
            .join("out")
            .join("textures")
            .join("cubemaps")
            .join("dynamic1pxcubemap_black.dds")
            .exists());
        Ok(())
    }
}
