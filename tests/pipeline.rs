//! End-to-end pipeline scenarios over synthetic data directories.

mod common;

use std::sync::{Arc, Mutex};

use parallaxgen_files::dds::reader::DdsReader;
use parallaxgen_files::dds::AlphaMode;
use parallaxgen_files::nif::{LightingShaderType, ShaderFlags1, ShaderFlags2, TextureSlot};

use parallaxgen::classify::TextureClassifier;
use parallaxgen::modmanager::ModManagerDirectory;
use parallaxgen::output::{DYN_CUBEMAP_PATH, DIFF_JSON_NAME};
use parallaxgen::plugin::MemoryRecordStore;
use parallaxgen::settings::PatcherConfig;
use parallaxgen::textures::TextureSet;

use common::{output_exists, push_shape, read_output_nif, single_shape_nif, TestEnv};

fn run_pipeline(env: &TestEnv, ctx: &Arc<parallaxgen::context::PgContext>, patch_plugin: bool) {
    let engine = env.build_engine(ctx);
    parallaxgen::run_patcher(ctx.clone(), engine, false, patch_plugin).expect("pipeline run");
}

/// S1: a single Default-shader shape with a matching heightmap gets vanilla
/// parallax applied, and the diff manifest records real checksums.
#[test]
fn vanilla_parallax_no_conflicts() {
    let env = TestEnv::new();
    env.write_nif(
        "meshes\\test.nif",
        &single_shape_nif(LightingShaderType::Default, "textures\\test_d.dds", "textures\\test_n.dds"),
    );
    env.write_dds("textures\\test_d.dds", 4, 4, [200, 180, 160, 255], AlphaMode::Unknown);
    env.write_dds("textures\\test_n.dds", 4, 4, [128, 128, 255, 255], AlphaMode::Unknown);
    env.write_dds("textures\\test_p.dds", 4, 4, [90, 0, 0, 255], AlphaMode::Unknown);

    let ctx = env.build_ctx_simple(PatcherConfig::default());
    run_pipeline(&env, &ctx, true);

    let patched = read_output_nif(&env, "meshes\\test.nif");
    let (shape, _) = patched.shapes()[0];
    let slots = patched.texture_slots(shape);
    assert_eq!(slots[u32::from(TextureSlot::Parallax) as usize], "textures\\test_p.dds");

    let shader = patched
        .shader_for_shape(shape)
        .and_then(|b| patched.lighting_shader(b))
        .unwrap();
    assert_eq!(shader.shader_type, LightingShaderType::Parallax);
    assert!(shader.flags1.contains(ShaderFlags1::PARALLAX));
    assert!(!shader.flags1.contains(ShaderFlags1::ENVIRONMENT_MAPPING));

    // P3: diff entries carry real checksums of both sides
    let diff = ctx.diff_snapshot();
    let entry = diff.get("meshes\\test.nif").expect("diff entry for patched mesh");
    assert_eq!(entry.crc32original, common::crc32_of(&env.abs_data("meshes\\test.nif")));
    assert_eq!(entry.crc32patched, common::crc32_of(&env.abs_output("meshes\\test.nif")));

    // diff manifest on disk agrees
    let raw = std::fs::read_to_string(env.abs_output(DIFF_JSON_NAME)).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(json.get("meshes\\test.nif").is_some());
}

/// S2: with the parallax-to-CM transform registered, the heightmap is
/// converted on the GPU and the shape lands on complex material.
#[test]
fn heightmap_promoted_to_complex_material() {
    let env = TestEnv::new();
    env.write_nif(
        "meshes\\test.nif",
        &single_shape_nif(LightingShaderType::Default, "textures\\test_d.dds", "textures\\test_n.dds"),
    );
    env.write_dds("textures\\test_d.dds", 4, 4, [200, 180, 160, 255], AlphaMode::Unknown);
    env.write_dds("textures\\test_n.dds", 4, 4, [128, 128, 255, 255], AlphaMode::Unknown);
    env.write_dds("textures\\test_p.dds", 4, 4, [90, 0, 0, 255], AlphaMode::Unknown);

    let config = PatcherConfig {
        upgrade_parallax_to_cm: true,
        ..Default::default()
    };
    let ctx = env.build_ctx_simple(config);
    run_pipeline(&env, &ctx, true);

    // the derived env-mask exists, is registered, and carries the height in
    // its alpha channel
    assert!(ctx.vfs.is_generated("textures\\test_m.dds"));
    let derived = std::fs::read(env.abs_output("textures\\test_m.dds")).unwrap();
    let (_, image) = DdsReader::decode_rgba(&derived).unwrap();
    assert_eq!(image.pixel(0, 0), [0, 0, 0, 90]);

    let patched = read_output_nif(&env, "meshes\\test.nif");
    let (shape, _) = patched.shapes()[0];
    let slots = patched.texture_slots(shape);
    assert_eq!(slots[u32::from(TextureSlot::Parallax) as usize], "");
    assert_eq!(slots[u32::from(TextureSlot::EnvMask) as usize], "textures\\test_m.dds");
    assert_eq!(slots[u32::from(TextureSlot::Cubemap) as usize], DYN_CUBEMAP_PATH);

    let shader = patched
        .shader_for_shape(shape)
        .and_then(|b| patched.lighting_shader(b))
        .unwrap();
    assert_eq!(shader.shader_type, LightingShaderType::EnvironmentMap);
    assert!(shader.flags1.contains(ShaderFlags1::ENVIRONMENT_MAPPING));
}

/// S3: a plugin alternate texture demanding PBR on one shape while the mesh
/// itself lands on complex material forces a pg1 duplicate and a rewired
/// model record.
#[test]
fn mesh_duplication_from_plugin_overrides() {
    let env = TestEnv::new();

    let mut nif = single_shape_nif(
        LightingShaderType::Default,
        "textures\\armor0.dds",
        "textures\\armor0_n.dds",
    );
    push_shape(
        &mut nif,
        "Shape1",
        LightingShaderType::Default,
        "textures\\armor.dds",
        "textures\\armor_n.dds",
    );
    env.write_nif("meshes\\armor.nif", &nif);

    env.write_dds("textures\\armor0.dds", 4, 4, [90, 90, 90, 255], AlphaMode::Unknown);
    env.write_dds("textures\\armor0_n.dds", 4, 4, [128, 128, 255, 255], AlphaMode::Unknown);
    env.write_dds("textures\\armor.dds", 4, 4, [120, 110, 100, 255], AlphaMode::Unknown);
    env.write_dds("textures\\armor_n.dds", 4, 4, [128, 128, 255, 255], AlphaMode::Unknown);
    // classified complex material for the mesh-level decision on shape 1
    env.write_cm_dds("textures\\armor_m.dds", 4, 4, true, false, false);

    // the PBR stack the plugin record points at
    env.write_dds("textures\\pbr\\armorvariant.dds", 4, 4, [100, 100, 100, 255], AlphaMode::Unknown);
    env.write_dds("textures\\pbr\\armorvariant_n.dds", 4, 4, [128, 128, 255, 255], AlphaMode::Unknown);
    env.write_dds("textures\\pbr\\armorvariant_rmaos.dds", 4, 4, [80, 80, 80, 255], AlphaMode::Unknown);
    env.write_loose(
        "pbrnifpatcher\\armor.json",
        serde_json::to_string(&serde_json::json!([{ "match_diffuse": "armorvariant" }]))
            .unwrap()
            .as_bytes(),
    );

    let mut store = MemoryRecordStore::new();
    let model = store.add_model("meshes\\armor.nif", "STAT");
    let mut txst_slots: TextureSet = Default::default();
    txst_slots[0] = "textures\\pbr\\armorvariant.dds".to_string();
    txst_slots[1] = "textures\\pbr\\armorvariant_n.dds".to_string();
    let txst = store.add_txst(txst_slots.clone(), "VariantTXST", 0x100);
    let alt_tex = store.add_alt_texture(model, txst, 1, "Armors.esp", 0x1234);

    let shared = Arc::new(Mutex::new(store));
    let mut mmd = ModManagerDirectory::new();
    mmd.populate_none();
    let ctx = env.build_ctx(PatcherConfig::default(), mmd, Box::new(shared.clone()));
    run_pipeline(&env, &ctx, true);

    // base mesh: complex material on shape 1
    let base = read_output_nif(&env, "meshes\\armor.nif");
    let (shape1, index1) = base.shapes()[1];
    assert_eq!(index1, 1);
    let base_shader = base.shader_for_shape(shape1).and_then(|b| base.lighting_shader(b)).unwrap();
    assert_eq!(base_shader.shader_type, LightingShaderType::EnvironmentMap);

    // duplicate mesh: PBR forced on shape 1
    assert!(output_exists(&env, "meshes\\pg1\\armor.nif"));
    let dup = read_output_nif(&env, "meshes\\pg1\\armor.nif");
    let (dup_shape1, _) = dup.shapes()[1];
    let dup_shader = dup.shader_for_shape(dup_shape1).and_then(|b| dup.lighting_shader(b)).unwrap();
    assert!(dup_shader.flags2.contains(ShaderFlags2::UNUSED01));

    let store = shared.lock().unwrap();
    // the model record was rewired to the duplicate
    assert_eq!(store.model_nif_path(model), "meshes\\pg1\\armor.nif");

    // P4: the record's new slots equal the PBR slot rewrite
    let new_slots = store.alt_tex_txst_slots(alt_tex);
    assert_eq!(new_slots[0], "textures\\pbr\\armorvariant.dds");
    assert_eq!(new_slots[1], "textures\\pbr\\armorvariant_n.dds");
    assert_eq!(new_slots[5], "textures\\pbr\\armorvariant_rmaos.dds");

    // the created record carries the conventional editor id
    let new_txst = store.alt_tex_txst(alt_tex);
    assert!(store.txst_edid(new_txst).starts_with("PG_armorvariant_"));
}

/// S4: the owning mod's priority decides conflicting matches, and the dry
/// run records the contention on both mods.
#[test]
fn conflicting_mods_priority_decides() {
    let env = TestEnv::new();
    env.write_nif(
        "meshes\\rock.nif",
        &single_shape_nif(LightingShaderType::Default, "textures\\rock.dds", "textures\\rock_n.dds"),
    );
    env.write_dds("textures\\rock.dds", 4, 4, [100, 100, 100, 255], AlphaMode::Unknown);
    env.write_dds("textures\\rock_n.dds", 4, 4, [128, 128, 255, 255], AlphaMode::Unknown);
    // mod A ships a complex material, mod B a heightmap
    env.write_cm_dds("textures\\rock_m.dds", 4, 4, true, true, false);
    env.write_dds("textures\\rock_p.dds", 4, 4, [90, 0, 0, 255], AlphaMode::Unknown);

    let mut mmd = ModManagerDirectory::new();
    let mod_a = mmd.add_mod("Mod A", true, 1);
    let mod_b = mmd.add_mod("Mod B", true, 2);
    mmd.assign_file("textures\\rock_m.dds", &mod_a);
    mmd.assign_file("textures\\rock_p.dds", &mod_b);

    let config = PatcherConfig {
        use_mm_order: false, // exercise the dry-run pass
        ..Default::default()
    };
    let ctx = env.build_ctx(config, mmd, Box::new(MemoryRecordStore::new()));
    run_pipeline(&env, &ctx, true);

    // B has the higher priority: parallax wins over A's complex material
    let patched = read_output_nif(&env, "meshes\\rock.nif");
    let (shape, _) = patched.shapes()[0];
    let shader = patched
        .shader_for_shape(shape)
        .and_then(|b| patched.lighting_shader(b))
        .unwrap();
    assert_eq!(shader.shader_type, LightingShaderType::Parallax);

    // the dry run saw both mods contending on the same shape
    let state_a = mod_a.state.read().unwrap();
    let state_b = mod_b.state.read().unwrap();
    assert!(state_a.conflicts.contains("Mod B"));
    assert!(state_b.conflicts.contains("Mod A"));
    assert!(state_b
        .shaders
        .contains(&parallaxgen::textures::ShapeShader::VanillaParallax));
    drop((state_a, state_b));

    assert!(env.abs_output("PGPatcher_ModConflicts.json").exists());
}

/// S5/P2: a mesh with nothing to patch is not written, not in the diff,
/// and its cache entry records the unmodified verdict for the next run.
#[test]
fn unmodified_mesh_short_circuits() {
    let env = TestEnv::new();
    env.write_nif(
        "meshes\\plain.nif",
        &single_shape_nif(LightingShaderType::Default, "textures\\plain.dds", "textures\\plain_n.dds"),
    );
    env.write_dds("textures\\plain.dds", 4, 4, [100, 100, 100, 255], AlphaMode::Unknown);
    env.write_dds("textures\\plain_n.dds", 4, 4, [128, 128, 255, 255], AlphaMode::Unknown);

    let ctx = env.build_ctx_simple(PatcherConfig::default());
    let engine = env.build_engine(&ctx);
    TextureClassifier::run(&ctx, false).unwrap();
    engine.clone().patch(&ctx, false, false);

    assert!(!output_exists(&env, "meshes\\plain.nif"));
    assert!(ctx.diff_snapshot().is_empty());

    let entry = ctx.cache.get_nif(&ctx.vfs, "meshes\\plain.nif").expect("cache entry");
    assert_eq!(entry.get("modified").and_then(|v| v.as_bool()), Some(false));

    // a second pass (fresh engine, same caches) also produces nothing
    let engine2 = env.build_engine(&ctx);
    engine2.patch(&ctx, false, false);
    assert!(!output_exists(&env, "meshes\\plain.nif"));
    assert!(ctx.diff_snapshot().is_empty());
}

/// S6: a mesh with a non-ASCII texture slot is rejected without aborting
/// the rest of the run.
#[test]
fn non_ascii_slot_rejects_single_mesh() {
    let env = TestEnv::new();

    // the builder plants the string straight into the block, bypassing the
    // writer-side ASCII check
    let bad = single_shape_nif(LightingShaderType::Default, "textures\\tést.dds", "textures\\t_n.dds");
    env.write_nif("meshes\\bad.nif", &bad);

    env.write_nif(
        "meshes\\good.nif",
        &single_shape_nif(LightingShaderType::Default, "textures\\test_d.dds", "textures\\test_n.dds"),
    );
    env.write_dds("textures\\test_d.dds", 4, 4, [200, 180, 160, 255], AlphaMode::Unknown);
    env.write_dds("textures\\test_n.dds", 4, 4, [128, 128, 255, 255], AlphaMode::Unknown);
    env.write_dds("textures\\test_p.dds", 4, 4, [90, 0, 0, 255], AlphaMode::Unknown);

    let ctx = env.build_ctx_simple(PatcherConfig::default());
    run_pipeline(&env, &ctx, true);

    assert!(!output_exists(&env, "meshes\\bad.nif"));
    assert!(output_exists(&env, "meshes\\good.nif"));
    assert!(ctx.diff_snapshot().contains_key("meshes\\good.nif"));
    assert!(!ctx.diff_snapshot().contains_key("meshes\\bad.nif"));
}

/// The post-save block sort moves shapes stored out of name order, and the
/// index corrections follow the shift into the plugin records.
#[test]
fn index_corrections_follow_block_sort() {
    let env = TestEnv::new();

    // "ZShape" is stored first but sorts after "AShape", so its 3D index
    // moves from 0 to 1 on save
    let mut nif = single_shape_nif(LightingShaderType::Default, "textures\\z.dds", "textures\\z_n.dds");
    push_shape(
        &mut nif,
        "AShape",
        LightingShaderType::Default,
        "textures\\a.dds",
        "textures\\a_n.dds",
    );
    // single_shape_nif names its shape "Shape0"; rename it for the sort
    let z_name = nif.add_string("ZShape");
    nif.tri_shape_mut(nif.shapes()[0].0).unwrap().name_ref = z_name;
    env.write_nif("meshes\\statue.nif", &nif);

    env.write_dds("textures\\z.dds", 4, 4, [100, 100, 100, 255], AlphaMode::Unknown);
    env.write_dds("textures\\z_n.dds", 4, 4, [128, 128, 255, 255], AlphaMode::Unknown);
    // heightmap makes ZShape patch, so the mesh is actually written
    env.write_dds("textures\\z_p.dds", 4, 4, [90, 0, 0, 255], AlphaMode::Unknown);
    env.write_dds("textures\\a.dds", 4, 4, [50, 50, 50, 255], AlphaMode::Unknown);
    env.write_dds("textures\\a_n.dds", 4, 4, [128, 128, 255, 255], AlphaMode::Unknown);

    let mut store = MemoryRecordStore::new();
    let model = store.add_model("meshes\\statue.nif", "STAT");
    let mut txst_slots: TextureSet = Default::default();
    txst_slots[0] = "textures\\z.dds".to_string();
    txst_slots[1] = "textures\\z_n.dds".to_string();
    let txst = store.add_txst(txst_slots, "StatueTXST", 0x200);
    // the record references ZShape by its pre-sort index
    let alt_tex = store.add_alt_texture(model, txst, 0, "Statues.esp", 0x900);

    let shared = Arc::new(Mutex::new(store));
    let mut mmd = ModManagerDirectory::new();
    mmd.populate_none();
    let ctx = env.build_ctx(PatcherConfig::default(), mmd, Box::new(shared.clone()));
    run_pipeline(&env, &ctx, true);

    // the written mesh leads with AShape after the sort
    let patched = read_output_nif(&env, "meshes\\statue.nif");
    let (first_shape, first_index) = patched.shapes()[0];
    assert_eq!(first_index, 0);
    assert_eq!(patched.block_display_name(first_shape), "AShape");
    let (z_shape, z_index) = patched.shapes()[1];
    assert_eq!(z_index, 1);
    assert_eq!(patched.block_display_name(z_shape), "ZShape");

    // ZShape got its heightmap on the patched mesh
    assert_eq!(
        patched.texture_slots(z_shape)[u32::from(TextureSlot::Parallax) as usize],
        "textures\\z_p.dds"
    );

    let store = shared.lock().unwrap();
    // the record was patched and its 3D index followed ZShape to 1
    assert_eq!(store.alt_tex_index3d(alt_tex), 1);
    let new_slots = store.alt_tex_txst_slots(alt_tex);
    assert_eq!(new_slots[u32::from(TextureSlot::Parallax) as usize], "textures\\z_p.dds");
    assert_eq!(store.model_nif_path(model), "meshes\\statue.nif");

    // the correction is traced under the alt-tex key and shape name
    let diag = ctx.diag.to_json();
    assert_eq!(
        diag["plugin"]["Statues.esp/2304/STAT"]["ZShape"]["newIndex3D"],
        serde_json::json!(1)
    );
}

/// P5: duplicate-mesh generation is deterministic across runs.
#[test]
fn duplicate_generation_is_deterministic() {
    fn build_env() -> (TestEnv, Arc<parallaxgen::context::PgContext>) {
        let env = TestEnv::new();
        let mut nif = single_shape_nif(
            LightingShaderType::Default,
            "textures\\armor.dds",
            "textures\\armor_n.dds",
        );
        push_shape(
            &mut nif,
            "Shape1",
            LightingShaderType::Default,
            "textures\\armor.dds",
            "textures\\armor_n.dds",
        );
        env.write_nif("meshes\\armor.nif", &nif);
        env.write_dds("textures\\armor.dds", 4, 4, [120, 110, 100, 255], AlphaMode::Unknown);
        env.write_dds("textures\\armor_n.dds", 4, 4, [128, 128, 255, 255], AlphaMode::Unknown);
        env.write_cm_dds("textures\\armor_m.dds", 4, 4, true, false, false);
        env.write_dds("textures\\pbr\\variant.dds", 4, 4, [100, 100, 100, 255], AlphaMode::Unknown);
        env.write_dds("textures\\pbr\\variant_n.dds", 4, 4, [128, 128, 255, 255], AlphaMode::Unknown);
        env.write_loose(
            "pbrnifpatcher\\variant.json",
            serde_json::to_string(&serde_json::json!([{ "match_diffuse": "variant" }]))
                .unwrap()
                .as_bytes(),
        );

        let mut store = MemoryRecordStore::new();
        // two carriers referencing the same mesh and variant: one duplicate
        for form_id in [0x1000u32, 0x2000] {
            let model = store.add_model("meshes\\armor.nif", "STAT");
            let mut slots: TextureSet = Default::default();
            slots[0] = "textures\\pbr\\variant.dds".to_string();
            slots[1] = "textures\\pbr\\variant_n.dds".to_string();
            let txst = store.add_txst(slots, "VariantTXST", 0x100);
            store.add_alt_texture(model, txst, 1, "Armors.esp", form_id);
        }

        let mut mmd = ModManagerDirectory::new();
        mmd.populate_none();
        let ctx = env.build_ctx(PatcherConfig::default(), mmd, Box::new(store));
        run_pipeline(&env, &ctx, true);
        (env, ctx)
    }

    let (env_a, _ctx_a) = build_env();
    let (env_b, _ctx_b) = build_env();

    // both carriers collapse onto a single pg1 duplicate
    assert!(output_exists(&env_a, "meshes\\pg1\\armor.nif"));
    assert!(!output_exists(&env_a, "meshes\\pg2\\armor.nif"));

    let bytes_a = std::fs::read(env_a.abs_output("meshes\\pg1\\armor.nif")).unwrap();
    let bytes_b = std::fs::read(env_b.abs_output("meshes\\pg1\\armor.nif")).unwrap();
    assert_eq!(bytes_a, bytes_b);
}

/// P6: classification over the same inputs is stable.
#[test]
fn classifier_is_stable_across_runs() {
    fn classify(env: &TestEnv) -> parallaxgen::textures::TextureMappings {
        let ctx = env.build_ctx_simple(PatcherConfig::default());
        TextureClassifier::run(&ctx, false).unwrap();
        std::mem::take(&mut *ctx.textures.write().unwrap())
    }

    let env = TestEnv::new();
    env.write_nif(
        "meshes\\test.nif",
        &single_shape_nif(LightingShaderType::Default, "textures\\test_d.dds", "textures\\test_n.dds"),
    );
    env.write_dds("textures\\test_d.dds", 4, 4, [200, 180, 160, 255], AlphaMode::Unknown);
    env.write_dds("textures\\test_n.dds", 4, 4, [128, 128, 255, 255], AlphaMode::Unknown);
    env.write_dds("textures\\test_p.dds", 4, 4, [90, 0, 0, 255], AlphaMode::Unknown);
    env.write_cm_dds("textures\\test_m.dds", 4, 4, true, true, false);

    let first = classify(&env);
    let second = classify(&env);
    assert_eq!(first, second);
    assert!(!first.types.is_empty());
}

/// P8: the mod-winner rule across enabled, disabled and absent mods.
#[test]
fn mod_winner_rule() {
    use parallaxgen::engine::build_registry;
    use parallaxgen::patchers;
    use parallaxgen::textures::ShapeShader;

    fn winner_for(disable_all: bool, with_mod_c_file: bool) -> Option<ShapeShader> {
        let env = TestEnv::new();
        env.write_nif(
            "meshes\\rock.nif",
            &single_shape_nif(LightingShaderType::Default, "textures\\rock.dds", "textures\\rock_n.dds"),
        );
        env.write_dds("textures\\rock.dds", 4, 4, [100, 100, 100, 255], AlphaMode::Unknown);
        env.write_dds("textures\\rock_n.dds", 4, 4, [128, 128, 255, 255], AlphaMode::Unknown);
        env.write_cm_dds("textures\\rock_m.dds", 4, 4, true, false, false);
        env.write_cm_dds("textures\\rock_em.dds", 4, 4, true, false, false);
        if with_mod_c_file {
            env.write_cm_dds("textures\\rock_envmask.dds", 4, 4, true, false, false);
        }

        let mut mmd = ModManagerDirectory::new();
        let mod_a = mmd.add_mod("Mod A", !disable_all, 1);
        let mod_b = mmd.add_mod("Mod B", false, 2);
        let mod_c = mmd.add_mod("Mod C", !disable_all, 3);
        mmd.assign_file("textures\\rock.dds", &mod_a);
        mmd.assign_file("textures\\rock_n.dds", &mod_a);
        mmd.assign_file("textures\\rock_m.dds", &mod_a);
        mmd.assign_file("textures\\rock_em.dds", &mod_b);
        mmd.assign_file("textures\\rock_envmask.dds", &mod_c);

        let ctx = env.build_ctx(PatcherConfig::default(), mmd, Box::new(MemoryRecordStore::new()));
        TextureClassifier::run(&ctx, false).unwrap();

        let (registry, _) = build_registry(&ctx.config);
        let bytes = std::fs::read(env.abs_data("meshes\\rock.nif")).unwrap();
        let nif = parallaxgen_files::nif::reader::NifReader::parse(&bytes, true).unwrap();
        let objects = registry.instantiate("meshes\\rock.nif", &nif);
        let (shape, _) = nif.shapes()[0];

        let slots = nif.texture_slots(shape);
        let can_apply = objects.can_apply_map(&ctx, &nif, shape, None);
        let mut matches = patchers::get_matches(&ctx, &slots, &objects, false);
        patchers::filter_matches(&mut matches, &can_apply);
        patchers::get_winning_match(&matches).map(|w| {
            (
                w.shader,
                w.owning_mod.map(|m| m.name.clone()).unwrap_or_default(),
            )
        })
        .map(|(shader, owner)| {
            // sanity: the winner's mod is what decided it
            match shader {
                ShapeShader::ComplexMaterial => assert!(owner == "Mod A" || owner == "Mod C"),
                _ => {}
            }
            shader
        })
    }

    // all three produce a CM match; disabled B is skipped, C has the
    // highest priority
    assert_eq!(winner_for(false, true), Some(ShapeShader::ComplexMaterial));

    // without C's file, A wins despite B's higher priority
    let env_check = winner_for(false, false);
    assert_eq!(env_check, Some(ShapeShader::ComplexMaterial));

    // everything disabled: nothing matches at all
    assert_eq!(winner_for(true, false), None);
}

/// P9: the complex-material classifier's alpha and channel rules.
#[test]
fn cm_classifier_rules() {
    use parallaxgen::textures::{TextureAttributes, TextureType};

    let env = TestEnv::new();
    // opaque alpha mode: stays a plain environment mask
    env.write_dds("textures\\opaque_m.dds", 4, 4, [0, 0, 0, 255], AlphaMode::Opaque);
    // sparse alpha with red and green populated: complex material
    env.write_cm_dds("textures\\real_m.dds", 4, 4, true, true, false);

    let ctx = env.build_ctx_simple(PatcherConfig::default());
    TextureClassifier::run(&ctx, false).unwrap();

    let mappings = ctx.textures.read().unwrap();
    assert_eq!(mappings.texture_type("textures\\opaque_m.dds"), TextureType::EnvironmentMask);
    assert_eq!(mappings.texture_type("textures\\real_m.dds"), TextureType::ComplexMaterial);
    assert!(mappings.has_attribute("textures\\real_m.dds", TextureAttributes::CM_ENV_MASK));
    assert!(mappings.has_attribute("textures\\real_m.dds", TextureAttributes::CM_GLOSSINESS));
    assert!(!mappings.has_attribute("textures\\real_m.dds", TextureAttributes::CM_METALNESS));
}

/// P7: the dry run leaves the output directory untouched.
#[test]
fn dry_run_is_pure() {
    let env = TestEnv::new();
    env.write_nif(
        "meshes\\test.nif",
        &single_shape_nif(LightingShaderType::Default, "textures\\test_d.dds", "textures\\test_n.dds"),
    );
    env.write_dds("textures\\test_d.dds", 4, 4, [200, 180, 160, 255], AlphaMode::Unknown);
    env.write_dds("textures\\test_n.dds", 4, 4, [128, 128, 255, 255], AlphaMode::Unknown);
    env.write_dds("textures\\test_p.dds", 4, 4, [90, 0, 0, 255], AlphaMode::Unknown);

    let config = PatcherConfig {
        upgrade_parallax_to_cm: true,
        ..Default::default()
    };
    let ctx = env.build_ctx_simple(config);
    let engine = env.build_engine(&ctx);
    TextureClassifier::run(&ctx, false).unwrap();
    engine.populate_mod_data(&ctx, false, true);

    assert!(ctx.output.is_output_empty());
    assert!(ctx.diff_snapshot().is_empty());
    assert!(!ctx.vfs.is_generated("textures\\test_m.dds"));
}
