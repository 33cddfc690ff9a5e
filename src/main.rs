use std::collections::BTreeMap;
use std::io::Write;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{bail, Context, Result};
use clap::Parser;
use dashmap::DashMap;

use parallaxgen::cache::PgCache;
use parallaxgen::context::PgContext;
use parallaxgen::diag::Diag;
use parallaxgen::engine::PatchEngine;
use parallaxgen::gpu::GpuService;
use parallaxgen::modmanager::{ModManagerDirectory, ModManagerType};
use parallaxgen::output::OutputManager;
use parallaxgen::patchers::shader_true_pbr;
use parallaxgen::plugin::{MemoryRecordStore, PluginPatcher};
use parallaxgen::settings::{CliArgs, PatcherConfig};
use parallaxgen::textures::TextureMappings;
use parallaxgen::vfs::Vfs;
use parallaxgen::warnings::Warnings;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level())
        .format_timestamp_millis()
        .init();
    log::trace!("Starting with args: {:?}", args);

    // unhandled panics leave a crash dump next to the executable
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let dump = format!("{info}\n{}", std::backtrace::Backtrace::force_capture());
        let path = std::env::temp_dir().join("parallaxgen_crash.txt");
        if let Ok(mut file) = std::fs::File::create(&path) {
            let _ = file.write_all(dump.as_bytes());
        }
        eprintln!("ParallaxGen crashed; details written to {}", path.display());
        default_hook(info);
    }));

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: CliArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => PatcherConfig::load(path)?,
        None => PatcherConfig::default(),
    };

    // configuration validation happens before any work
    if !args.data_dir.is_dir() {
        bail!("data directory does not exist: {}", args.data_dir.display());
    }
    let data_canonical = args.data_dir.canonicalize()?;
    if let Ok(output_canonical) = args.output_dir.canonicalize() {
        if output_canonical == data_canonical {
            bail!("output directory must not be the data directory");
        }
        if output_canonical.starts_with(&data_canonical) {
            bail!("output directory must not be inside the data directory");
        }
    }

    let output = OutputManager::new(args.output_dir.clone());
    output.delete_output_dir()?;

    let mut mmd = ModManagerDirectory::new();
    match args.mod_manager {
        ModManagerType::None => mmd.populate_none(),
        ModManagerType::ModOrganizer2 => {
            let instance_dir = args
                .mo2_instance_dir
                .as_ref()
                .context("--mo2-instance-dir is required with --mod-manager mod-organizer2")?;
            mmd.populate_mo2(instance_dir, &args.mo2_profile, &args.output_dir, config.use_mm_order)?;
        }
        ModManagerType::Vortex => {
            let deployment_dir = args.vortex_deployment_dir.clone().unwrap_or_else(|| args.data_dir.clone());
            mmd.populate_vortex(&deployment_dir)?;
        }
    }

    let mut vfs = Vfs::new(args.data_dir.clone(), args.output_dir.clone());
    vfs.populate(!args.no_archives)?;

    let gpu = GpuService::init_shaders();
    let pbr_configs = shader_true_pbr::load_configs(&vfs);

    let cache_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.join("cache")))
        .unwrap_or_else(|| args.output_dir.join("cache"));
    let cache = PgCache::new(cache_dir, !args.no_cache);
    cache.load();

    let plugin = PluginPatcher::new(Box::new(MemoryRecordStore::new()));
    plugin.initialize(&[], cache.load_txst_form_ids())?;
    plugin.populate_objects()?;

    let ctx = Arc::new(PgContext {
        config,
        vfs,
        mmd,
        gpu,
        textures: RwLock::new(TextureMappings::default()),
        warnings: Warnings::new(),
        diff: Mutex::new(BTreeMap::new()),
        cache,
        diag: Diag::new(args.diagnostics),
        output,
        plugin: Some(plugin),
        pbr_configs,
        patched_sets: DashMap::new(),
    });

    let engine = Arc::new(PatchEngine::new(&ctx.config, args.high_mem));
    let multithread = !args.no_multithread;

    parallaxgen::run_patcher(ctx.clone(), engine, multithread, true)?;

    if let Some(plugin) = &ctx.plugin {
        plugin.save_plugin(ctx.output.output_dir(), args.esmify)?;
        ctx.cache.save_txst_form_ids(&plugin.form_id_cache())?;
    }
    ctx.cache.save()?;

    if args.zip_output {
        ctx.output.zip_output()?;
    }

    log::info!("Done. Output written to {}", ctx.output.output_dir().display());
    Ok(())
}
