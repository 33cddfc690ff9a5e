//! Shared fixture plumbing for the pipeline tests: a synthetic data
//! directory, context construction mirroring the binary's startup, and
//! small builders for meshes and textures.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use parallaxgen_files::dds::writer::DdsWriter;
use parallaxgen_files::dds::{AlphaMode, DecodedImage};
use parallaxgen_files::nif::writer::NifWriter;
use parallaxgen_files::nif::{
    Block, LightingShaderProperty, LightingShaderType, NifFile, ShaderTextureSet, TriShape,
};

use parallaxgen::cache::PgCache;
use parallaxgen::context::PgContext;
use parallaxgen::diag::Diag;
use parallaxgen::engine::PatchEngine;
use parallaxgen::gpu::GpuService;
use parallaxgen::modmanager::ModManagerDirectory;
use parallaxgen::output::OutputManager;
use parallaxgen::patchers::shader_true_pbr;
use parallaxgen::plugin::{MemoryRecordStore, PluginPatcher, RecordStore};
use parallaxgen::settings::PatcherConfig;
use parallaxgen::textures::TextureMappings;
use parallaxgen::vfs::Vfs;
use parallaxgen::warnings::Warnings;

pub struct TestEnv {
    pub root: tempfile::TempDir,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let data_dir = root.path().join("data");
        let output_dir = root.path().join("output");
        std::fs::create_dir_all(&data_dir).expect("data dir");
        Self {
            root,
            data_dir,
            output_dir,
        }
    }

    pub fn write_loose(&self, rel: &str, bytes: &[u8]) {
        let path = self.abs_data(rel);
        std::fs::create_dir_all(path.parent().unwrap()).expect("parents");
        std::fs::write(path, bytes).expect("write loose file");
    }

    pub fn abs_data(&self, rel: &str) -> PathBuf {
        let mut path = self.data_dir.clone();
        for part in rel.split('\\') {
            path.push(part);
        }
        path
    }

    pub fn abs_output(&self, rel: &str) -> PathBuf {
        let mut path = self.output_dir.clone();
        for part in rel.split('\\') {
            path.push(part);
        }
        path
    }

    pub fn write_nif(&self, rel: &str, nif: &NifFile) {
        let bytes = NifWriter::write(nif).expect("serialize nif");
        self.write_loose(rel, &bytes);
    }

    /// Uniform-color RGBA8 texture.
    pub fn write_dds(&self, rel: &str, width: u32, height: u32, rgba: [u8; 4], alpha_mode: AlphaMode) {
        let mut image = DecodedImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                image.set_pixel(x, y, rgba);
            }
        }
        let bytes = DdsWriter::write_rgba8(std::slice::from_ref(&image), alpha_mode).expect("encode dds");
        self.write_loose(rel, &bytes);
    }

    /// A texture that passes the complex-material test: sparse alpha plus
    /// the requested channel populations.
    pub fn write_cm_dds(&self, rel: &str, width: u32, height: u32, r: bool, g: bool, b: bool) {
        let mut image = DecodedImage::new(width, height);
        // populate exactly one alpha pixel (well under half)
        image.set_pixel(0, 0, [
            if r { 128 } else { 0 },
            if g { 128 } else { 0 },
            if b { 128 } else { 0 },
            200,
        ]);
        let bytes = DdsWriter::write_rgba8(std::slice::from_ref(&image), AlphaMode::Straight).expect("encode dds");
        self.write_loose(rel, &bytes);
    }

    /// Context over the null mod manager and an empty record store.
    pub fn build_ctx_simple(&self, config: PatcherConfig) -> Arc<PgContext> {
        let mut mmd = ModManagerDirectory::new();
        mmd.populate_none();
        self.build_ctx(config, mmd, Box::new(MemoryRecordStore::new()))
    }

    pub fn build_ctx(&self, config: PatcherConfig, mmd: ModManagerDirectory, store: Box<dyn RecordStore>) -> Arc<PgContext> {
        let mut vfs = Vfs::new(self.data_dir.clone(), self.output_dir.clone());
        vfs.populate(true).expect("populate vfs");

        let pbr_configs = shader_true_pbr::load_configs(&vfs);

        let plugin = PluginPatcher::new(store);
        plugin.initialize(&[], Default::default()).expect("plugin init");
        plugin.populate_objects().expect("plugin populate");

        Arc::new(PgContext {
            config,
            vfs,
            mmd,
            gpu: GpuService::init_shaders(),
            textures: RwLock::new(TextureMappings::default()),
            warnings: Warnings::new(),
            diff: Mutex::new(BTreeMap::new()),
            cache: PgCache::new(self.root.path().join("cache"), true),
            // keep the trace live so tests can assert on it
            diag: Diag::new(true),
            output: OutputManager::new(self.output_dir.clone()),
            plugin: Some(plugin),
            pbr_configs,
            patched_sets: DashMap::new(),
        })
    }

    pub fn build_engine(&self, ctx: &PgContext) -> Arc<PatchEngine> {
        Arc::new(PatchEngine::new(&ctx.config, false))
    }
}

/// A single-shape mesh with the given diffuse/normal and shader type.
pub fn single_shape_nif(shader_type: LightingShaderType, diffuse: &str, normal: &str) -> NifFile {
    let mut nif = NifFile::new();
    let name_ref = nif.add_string("Shape0");

    let mut set = ShaderTextureSet::new();
    set.textures[0] = diffuse.to_string();
    set.textures[1] = normal.to_string();
    let set_block = nif.add_block("BSShaderTextureSet", Block::TextureSet(set));

    let mut shader = LightingShaderProperty::new(shader_type);
    shader.texture_set_ref = set_block as u32;
    let shader_block = nif.add_block("BSLightingShaderProperty", Block::LightingShader(shader));

    let mut shape = TriShape::new();
    shape.name_ref = name_ref;
    shape.shader_ref = shader_block as u32;
    nif.add_block("BSTriShape", Block::TriShape(shape));

    nif
}

/// Appends one more shape (own texture set + shader) to a mesh.
pub fn push_shape(nif: &mut NifFile, name: &str, shader_type: LightingShaderType, diffuse: &str, normal: &str) {
    let name_ref = nif.add_string(name);

    let mut set = ShaderTextureSet::new();
    set.textures[0] = diffuse.to_string();
    set.textures[1] = normal.to_string();
    let set_block = nif.add_block("BSShaderTextureSet", Block::TextureSet(set));

    let mut shader = LightingShaderProperty::new(shader_type);
    shader.texture_set_ref = set_block as u32;
    let shader_block = nif.add_block("BSLightingShaderProperty", Block::LightingShader(shader));

    let mut shape = TriShape::new();
    shape.name_ref = name_ref;
    shape.shader_ref = shader_block as u32;
    nif.add_block("BSTriShape", Block::TriShape(shape));
}

pub fn read_output_nif(env: &TestEnv, rel: &str) -> NifFile {
    let bytes = std::fs::read(env.abs_output(rel)).expect("output nif present");
    parallaxgen_files::nif::reader::NifReader::parse(&bytes, true).expect("parse output nif")
}

pub fn output_exists(env: &TestEnv, rel: &str) -> bool {
    env.abs_output(rel).exists()
}

pub fn crc32_of(path: &Path) -> u32 {
    crc32fast::hash(&std::fs::read(path).expect("file for crc"))
}
