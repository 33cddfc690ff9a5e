pub mod cache;
pub mod classify;
pub mod context;
pub mod diag;
pub mod engine;
pub mod gpu;
pub mod modmanager;
pub mod output;
pub mod patchers;
pub mod plugin;
pub mod runner;
pub mod settings;
pub mod textures;
pub mod util;
pub mod vfs;
pub mod warnings;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crate::context::PgContext;
use crate::engine::PatchEngine;
use crate::modmanager::UNRANKED_PRIORITY;
use crate::util::logger;

/// The full patch pipeline over a built context: optional dry-run conflict
/// discovery, texture classification, the two patch phases and the final
/// output artifacts.
pub fn run_patcher(ctx: Arc<PgContext>, engine: Arc<PatchEngine>, multithread: bool, patch_plugin: bool) -> Result<()> {
    classify::TextureClassifier::run(&ctx, multithread)?;

    // conflict discovery before the real pass, unless the user promoted the
    // mod manager's order outright
    if !ctx.config.use_mm_order && !ctx.mmd.mods().is_empty() {
        logger::info("Running dry-run pass for mod conflict discovery");
        engine.clone().populate_mod_data(&ctx, multithread, patch_plugin);
        ctx.output.write_json("PGPatcher_ModConflicts.json", &mod_conflict_report(&ctx))?;
    }

    // the dynamic cubemap ships with the output and must be visible to the
    // patchers (the restore-defaults pass checks slot files for existence)
    if !ctx.vfs.is_file(output::DYN_CUBEMAP_PATH) {
        ctx.output.write_dyn_cubemap()?;
        ctx.vfs.add_generated(output::DYN_CUBEMAP_PATH, None)?;
    }

    logger::info("Patching meshes");
    engine.clone().patch(&ctx, multithread, patch_plugin);

    logger::info("Patching textures");
    engine.patch_textures(&ctx, multithread);

    ctx.output.write_json(output::DIFF_JSON_NAME, &ctx.diff_snapshot())?;
    if ctx.diag.is_enabled() {
        ctx.output.write_json(output::DIAG_JSON_NAME, &ctx.diag.to_json())?;
    }

    ctx.warnings.print();
    Ok(())
}

/// `{mod -> (shaders, conflicts, priority)}` after a dry run, the input of
/// the sort dialog.
pub fn mod_conflict_report(ctx: &PgContext) -> serde_json::Value {
    let mut report = BTreeMap::new();
    for mod_ptr in ctx.mmd.mods() {
        let state = mod_ptr.state.read().unwrap_or_else(|e| e.into_inner());

        let mut shaders: Vec<&str> = state.shaders.iter().map(|s| s.label()).collect();
        shaders.sort();
        let mut conflicts: Vec<&String> = state.conflicts.iter().collect();
        conflicts.sort();
        let priority = (state.priority != UNRANKED_PRIORITY).then_some(state.priority);

        report.insert(
            mod_ptr.name.clone(),
            json!({
                "shaders": shaders,
                "conflicts": conflicts,
                "priority": priority,
                "new": state.is_new,
            }),
        );
    }
    serde_json::to_value(report).unwrap_or_default()
}
