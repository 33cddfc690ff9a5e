//! The patcher framework: five collaborator categories over a small
//! interface, a factory registry instantiated fresh per mesh, and the match
//! selection that resolves a winner across conflicting mods.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parallaxgen_files::nif::NifFile;
use serde_json::json;

use crate::context::PgContext;
use crate::modmanager::Mod;
use crate::textures::{MatchedFromSlots, ShapeShader, TextureSet};
use crate::util::logger;

pub mod global_fix_effect_lighting;
pub mod hooks;
pub mod post_fix_sss;
pub mod post_hair_flow_map;
pub mod post_restore_default_shaders;
pub mod pre_disable_mlp;
pub mod pre_fix_slot_count;
pub mod shader_complex_material;
pub mod shader_default;
pub mod shader_true_pbr;
pub mod shader_vanilla_parallax;
pub mod texture_convert_to_hdr;
pub mod transform_parallax_to_cm;

/// One candidate binding a shader patcher wants to apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatcherMatch {
    pub matched_path: String,
    /// Which input slots drove the match.
    pub matched_from: MatchedFromSlots,
    /// Patcher-private payload handed back to `apply`.
    pub extra: Option<serde_json::Value>,
}

/// A match annotated with provenance and the transform gate.
#[derive(Debug, Clone)]
pub struct ShaderPatcherMatch {
    pub owning_mod: Option<Arc<Mod>>,
    pub shader: ShapeShader,
    pub patcher_match: PatcherMatch,
    pub transform_to: Option<ShapeShader>,
}

impl ShaderPatcherMatch {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "mod": self.owning_mod.as_ref().map(|m| m.name.clone()),
            "shader": self.shader.label(),
            "matchedPath": self.patcher_match.matched_path,
            "transformTo": self.transform_to.map(|s| s.label()),
        })
    }
}

pub type CanApplyMap = HashMap<ShapeShader, bool>;

/// Runs before shader selection; may rewrite slots or shader state in
/// place. Must be idempotent.
pub trait PreMeshPatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, ctx: &PgContext, nif: &mut NifFile, shape: usize) -> Result<bool>;
    /// Whether a change from this patcher alone forces a mesh write.
    fn trigger_save(&self) -> bool {
        true
    }
}

/// The only category with competing alternatives.
pub trait ShaderPatcher: Send + Sync {
    fn shader(&self) -> ShapeShader;
    fn name(&self) -> &'static str;

    /// Cheap structural test on the shape; called once per shape.
    fn can_apply(&self, ctx: &PgContext, nif: &NifFile, shape: usize) -> bool;

    /// Candidate matches for a texture set.
    fn should_apply(&self, ctx: &PgContext, slots: &TextureSet) -> Vec<PatcherMatch>;

    /// Mutates the shape and returns the new slots plus whether the mesh
    /// changed.
    fn apply(
        &self,
        ctx: &PgContext,
        nif: &mut NifFile,
        shape: usize,
        old_slots: &TextureSet,
        patcher_match: &PatcherMatch,
    ) -> Result<(TextureSet, bool)>;

    /// Slot-only application for record patching, where the mesh that the
    /// record references may not be the one currently open.
    fn apply_slots(&self, ctx: &PgContext, old_slots: &TextureSet, patcher_match: &PatcherMatch) -> TextureSet;

    /// Forces the shader's non-slot state, used when a duplicate mesh run
    /// dictates the shader without a match.
    fn apply_shader(&self, ctx: &PgContext, nif: &mut NifFile, shape: usize) -> Result<bool>;

    /// Hook for shader-specific bookkeeping when a new TXST is created.
    fn process_new_txst_record(&self, _patcher_match: &PatcherMatch, _edid: &str) {}
}

/// Rewrites a shader-A match into a shader-B match, typically scheduling a
/// derived texture.
pub trait ShaderTransformPatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn from_shader(&self) -> ShapeShader;
    fn to_shader(&self) -> ShapeShader;
    fn transform(&self, ctx: &PgContext, from_match: &PatcherMatch) -> Result<PatcherMatch>;
}

/// Runs after shader selection on each shape.
pub trait PostMeshPatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, ctx: &PgContext, nif: &mut NifFile, shape: usize) -> Result<bool>;
    fn trigger_save(&self) -> bool {
        true
    }
}

/// Operates on the whole mesh rather than a shape.
pub trait GlobalMeshPatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, ctx: &PgContext, nif: &mut NifFile) -> Result<bool>;
    fn trigger_save(&self) -> bool {
        true
    }
}

/// Whole-texture rewrite during the texture patch phase.
pub trait TexturePatcher: Send + Sync {
    fn name(&self) -> &'static str;
    /// Whether this patcher wants the texture at all.
    fn applies_to(&self, ctx: &PgContext, canonical_path: &str) -> bool;
    /// Returns the replacement encoded bytes, or None to leave the file.
    fn apply(&self, ctx: &PgContext, canonical_path: &str) -> Result<Option<Vec<u8>>>;
}

pub type PreMeshFactory = Box<dyn Fn(&str, &NifFile) -> Box<dyn PreMeshPatcher> + Send + Sync>;
pub type ShaderFactory = Box<dyn Fn(&str, &NifFile) -> Box<dyn ShaderPatcher> + Send + Sync>;
pub type TransformFactory = Box<dyn Fn(&str, &NifFile) -> Box<dyn ShaderTransformPatcher> + Send + Sync>;
pub type PostMeshFactory = Box<dyn Fn(&str, &NifFile) -> Box<dyn PostMeshPatcher> + Send + Sync>;
pub type GlobalMeshFactory = Box<dyn Fn(&str, &NifFile) -> Box<dyn GlobalMeshPatcher> + Send + Sync>;

/// Factory registry, populated once at startup. Shader patchers keep their
/// registration order; it is the stable tie-break for match selection.
#[derive(Default)]
pub struct MeshPatcherRegistry {
    pub pre: Vec<PreMeshFactory>,
    pub shaders: Vec<(ShapeShader, ShaderFactory)>,
    /// from-shader -> (target shader, factory); at most one per source.
    pub transforms: HashMap<ShapeShader, (ShapeShader, TransformFactory)>,
    pub post: Vec<PostMeshFactory>,
    pub global: Vec<GlobalMeshFactory>,
}

/// Fresh per-mesh instances of every registered patcher.
pub struct MeshPatcherObjects {
    pub pre: Vec<Box<dyn PreMeshPatcher>>,
    pub shaders: Vec<(ShapeShader, Box<dyn ShaderPatcher>)>,
    pub transforms: HashMap<ShapeShader, (ShapeShader, Box<dyn ShaderTransformPatcher>)>,
    pub post: Vec<Box<dyn PostMeshPatcher>>,
    pub global: Vec<Box<dyn GlobalMeshPatcher>>,
}

impl MeshPatcherRegistry {
    pub fn instantiate(&self, nif_path: &str, nif: &NifFile) -> MeshPatcherObjects {
        MeshPatcherObjects {
            pre: self.pre.iter().map(|f| f(nif_path, nif)).collect(),
            shaders: self.shaders.iter().map(|(s, f)| (*s, f(nif_path, nif))).collect(),
            transforms: self
                .transforms
                .iter()
                .map(|(from, (to, f))| (*from, (*to, f(nif_path, nif))))
                .collect(),
            post: self.post.iter().map(|f| f(nif_path, nif)).collect(),
            global: self.global.iter().map(|f| f(nif_path, nif)).collect(),
        }
    }
}

impl MeshPatcherObjects {
    pub fn shader_patcher(&self, shader: ShapeShader) -> Option<&dyn ShaderPatcher> {
        self.shaders
            .iter()
            .find(|(s, _)| *s == shader)
            .map(|(_, p)| p.as_ref())
    }

    /// `{shader -> can_apply}` for one shape. A forced shader restricts the
    /// map to that shader alone.
    pub fn can_apply_map(
        &self,
        ctx: &PgContext,
        nif: &NifFile,
        shape: usize,
        force_shader: Option<ShapeShader>,
    ) -> CanApplyMap {
        let mut map = CanApplyMap::new();
        for (shader, patcher) in &self.shaders {
            if let Some(forced) = force_shader {
                if *shader != forced {
                    continue;
                }
            }
            map.insert(*shader, patcher.can_apply(ctx, nif, shape));
        }
        map
    }
}

/// Collects candidate matches from every shader patcher for one slot tuple.
///
/// During a dry run, disabled mods still produce matches (the user is about
/// to rank them) and every multi-mod contention is recorded into the mods'
/// conflict sets instead.
pub fn get_matches(
    ctx: &PgContext,
    slots: &TextureSet,
    objects: &MeshPatcherObjects,
    dry_run: bool,
) -> Vec<ShaderPatcherMatch> {
    let mut matches: Vec<ShaderPatcherMatch> = Vec::new();
    let mut mods_seen: Vec<Arc<Mod>> = Vec::new();

    for (shader, patcher) in &objects.shaders {
        let _prefix = logger::Prefix::new(patcher.name());

        let candidates = patcher.should_apply(ctx, slots);
        if candidates.is_empty() {
            logger::trace("Rejecting: shader not applicable");
            continue;
        }

        for candidate in candidates {
            let owning_mod = ctx.mod_for(&candidate.matched_path);

            if !dry_run {
                if let Some(owner) = &owning_mod {
                    if !owner.is_enabled() {
                        logger::trace(format!("Rejecting: mod '{}' is not enabled", owner.name));
                        continue;
                    }
                }
            }

            let transform_to = objects.transforms.get(shader).map(|(to, _)| *to);

            if *shader != ShapeShader::None {
                // a specific match from a mod supersedes that mod's default
                // matches
                if let Some(owner) = &owning_mod {
                    matches.retain(|m| {
                        !(m.shader == ShapeShader::None
                            && m.owning_mod.as_ref().map(|om| om.name.as_str()) == Some(owner.name.as_str()))
                    });
                }
            }

            if let Some(owner) = &owning_mod {
                if !mods_seen.iter().any(|m| m.name == owner.name) {
                    mods_seen.push(owner.clone());
                }
            }

            matches.push(ShaderPatcherMatch {
                owning_mod,
                shader: *shader,
                patcher_match: candidate,
                transform_to,
            });
        }
    }

    if dry_run {
        if mods_seen.len() > 1 {
            for m in &matches {
                let Some(owner) = &m.owning_mod else {
                    continue;
                };
                let mut state = owner.state.write().unwrap_or_else(|e| e.into_inner());
                state.shaders.insert(m.shader);
                for other in &mods_seen {
                    if other.name != owner.name {
                        state.conflicts.insert(other.name.clone());
                    }
                }
            }
        }
        return matches;
    }

    if ctx.diag.is_enabled() {
        for m in &matches {
            logger::trace(format!("Candidate: {}", m.to_json()));
        }
    }

    matches
}

/// Drops matches whose shader (and transform target) cannot apply to the
/// shape at hand.
pub fn filter_matches(matches: &mut Vec<ShaderPatcherMatch>, can_apply: &CanApplyMap) {
    matches.retain(|m| {
        let shader_ok = can_apply.get(&m.shader).copied().unwrap_or(false);
        let transform_ok = m
            .transform_to
            .map(|t| can_apply.get(&t).copied().unwrap_or(false))
            .unwrap_or(false);
        shader_ok || transform_ok
    });
}

/// Highest mod priority wins; equal priority resolves to the later match,
/// which makes the shader registration order the stable tie-break.
pub fn get_winning_match(matches: &[ShaderPatcherMatch]) -> Option<ShaderPatcherMatch> {
    let mut max_priority = i32::MIN;
    let mut winner: Option<&ShaderPatcherMatch> = None;

    for m in matches {
        let priority = m.owning_mod.as_ref().map(|owner| owner.priority()).unwrap_or(-1);

        let _prefix = logger::Prefix::new(m.owning_mod.as_ref().map(|o| o.name.clone()).unwrap_or_default());
        if priority < max_priority {
            logger::trace("Rejecting: mod has lower priority than current winner");
            continue;
        }

        logger::trace("Mod accepted");
        max_priority = priority;
        winner = Some(m);
    }

    winner.cloned()
}

/// Fires the transform gate on the winning match if one is pending.
/// Returns true when the match was rewritten.
pub fn apply_transform_if_needed(
    ctx: &PgContext,
    winning: &mut ShaderPatcherMatch,
    objects: &MeshPatcherObjects,
) -> Result<bool> {
    let Some(target) = winning.transform_to.take() else {
        return Ok(false);
    };

    let Some((_, transform)) = objects.transforms.get(&winning.shader) else {
        return Ok(false);
    };

    winning.patcher_match = transform.transform(ctx, &winning.patcher_match)?;
    winning.shader = target;
    Ok(true)
}
