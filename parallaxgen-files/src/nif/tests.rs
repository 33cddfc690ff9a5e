use crate::nif::reader::NifReader;
use crate::nif::writer::NifWriter;
use crate::nif::{
    Block, LightingShaderProperty, LightingShaderType, NifFile, ShaderFlags1, ShaderFlags2, ShaderTextureSet,
    TextureSlot, TriShape,
};
use crate::ParserError;

fn build_single_shape_nif() -> NifFile {
    let mut nif = NifFile::new();
    let name_ref = nif.add_string("TestShape");

    let mut set = ShaderTextureSet::new();
    set.textures[0] = "textures\\test_d.dds".to_string();
    set.textures[1] = "textures\\test_n.dds".to_string();
    let set_block = nif.add_block("BSShaderTextureSet", Block::TextureSet(set));

    let mut shader = LightingShaderProperty::new(LightingShaderType::Default);
    shader.texture_set_ref = set_block as u32;
    let shader_block = nif.add_block("BSLightingShaderProperty", Block::LightingShader(shader));

    let mut shape = TriShape::new();
    shape.name_ref = name_ref;
    shape.shader_ref = shader_block as u32;
    nif.add_block("BSTriShape", Block::TriShape(shape));

    nif
}

#[test]
fn roundtrip_preserves_blocks() -> Result<(), anyhow::Error> {
    let nif = build_single_shape_nif();
    let bytes = NifWriter::write(&nif)?;
    let parsed = NifReader::parse(&bytes, true)?;

    assert_eq!(parsed.blocks.len(), 3);
    assert_eq!(parsed.shapes().len(), 1);

    let (shape_block, index3d) = parsed.shapes()[0];
    assert_eq!(index3d, 0);
    assert_eq!(parsed.block_display_name(shape_block), "TestShape");

    let slots = parsed.texture_slots(shape_block);
    assert_eq!(slots[0], "textures\\test_d.dds");
    assert_eq!(slots[1], "textures\\test_n.dds");
    assert_eq!(slots[3], "");

    // a second write of an unmodified parse is byte identical
    let bytes2 = NifWriter::write(&parsed)?;
    assert_eq!(bytes, bytes2);

    Ok(())
}

#[test]
fn set_texture_slot_reports_changes() -> Result<(), anyhow::Error> {
    let mut nif = build_single_shape_nif();
    let (shape_block, _) = nif.shapes()[0];

    assert!(nif.set_texture_slot(shape_block, TextureSlot::Parallax, "textures\\test_p.dds")?);
    // same value, case-insensitively: no change
    assert!(!nif.set_texture_slot(shape_block, TextureSlot::Parallax, "Textures\\TEST_P.dds")?);

    let slots = nif.texture_slots(shape_block);
    assert_eq!(slots[3], "textures\\test_p.dds");
    Ok(())
}

#[test]
fn non_ascii_slot_is_rejected() {
    let mut nif = build_single_shape_nif();
    let (shape_block, _) = nif.shapes()[0];

    let result = nif.set_texture_slot(shape_block, TextureSlot::Diffuse, "textures\\tést.dds");
    assert!(matches!(result, Err(ParserError::NonAsciiTextureSlot { .. })));

    // and at parse time via validate_slots
    if let Some(Block::TextureSet(set)) = nif.blocks.get_mut(0).map(|b| &mut b.block) {
        set.textures[0] = "textures\\tést.dds".to_string();
    }
    let bytes = NifWriter::write(&nif).unwrap();
    assert!(matches!(
        NifReader::parse(&bytes, true),
        Err(ParserError::NonAsciiTextureSlot { .. })
    ));
    // without checks the file still parses
    assert!(NifReader::parse(&bytes, false).is_ok());
}

#[test]
fn dangling_texture_set_ref_is_tolerated() -> Result<(), anyhow::Error> {
    let mut nif = NifFile::new();
    let mut shader = LightingShaderProperty::new(LightingShaderType::Default);
    shader.texture_set_ref = 42; // no such block
    let shader_block = nif.add_block("BSLightingShaderProperty", Block::LightingShader(shader));

    let mut shape = TriShape::new();
    shape.shader_ref = shader_block as u32;
    nif.add_block("BSTriShape", Block::TriShape(shape));

    let bytes = NifWriter::write(&nif)?;
    let parsed = NifReader::parse(&bytes, true)?;

    let (shape_block, _) = parsed.shapes()[0];
    assert!(parsed.texture_set_for_shape(shape_block).is_none());
    assert_eq!(parsed.texture_slots(shape_block)[0], "");
    Ok(())
}

#[test]
fn env_map_scale_follows_shader_type() -> Result<(), anyhow::Error> {
    let mut shader = LightingShaderProperty::new(LightingShaderType::Default);
    assert!(shader.env_map_scale.is_none());

    assert!(shader.set_shader_type(LightingShaderType::EnvironmentMap));
    assert_eq!(shader.env_map_scale, Some(1.0));
    assert!(!shader.set_shader_type(LightingShaderType::EnvironmentMap));

    let mut nif = NifFile::new();
    nif.add_block("BSLightingShaderProperty", Block::LightingShader(shader));
    let bytes = NifWriter::write(&nif)?;
    let parsed = NifReader::parse(&bytes, false)?;
    let parsed_shader = parsed.lighting_shader(0).unwrap();
    assert_eq!(parsed_shader.shader_type, LightingShaderType::EnvironmentMap);
    assert_eq!(parsed_shader.env_map_scale, Some(1.0));
    Ok(())
}

#[test]
fn unknown_blocks_roundtrip_verbatim() -> Result<(), anyhow::Error> {
    let mut nif = build_single_shape_nif();
    nif.add_block(
        "BSBehaviorGraphExtraData",
        Block::Unknown(crate::nif::types::UnknownBlock {
            data: vec![0xde, 0xad, 0xbe, 0xef],
        }),
    );

    let bytes = NifWriter::write(&nif)?;
    let parsed = NifReader::parse(&bytes, true)?;
    match &parsed.blocks[3].block {
        Block::Unknown(raw) => assert_eq!(raw.data, vec![0xde, 0xad, 0xbe, 0xef]),
        other => panic!("expected unknown block, got {other:?}"),
    }
    assert_eq!(parsed.blocks[3].type_name, "BSBehaviorGraphExtraData");

    // the extra data block is not a shape
    assert_eq!(parsed.shapes().len(), 1);
    Ok(())
}

fn two_shape_nif_out_of_name_order() -> NifFile {
    let mut nif = NifFile::new();

    // "ZShape" first: set(0), shader(1), shape(2)
    let z_name = nif.add_string("ZShape");
    let mut z_set = ShaderTextureSet::new();
    z_set.textures[0] = "textures\\z_d.dds".to_string();
    let z_set_block = nif.add_block("BSShaderTextureSet", Block::TextureSet(z_set));
    let mut z_shader = LightingShaderProperty::new(LightingShaderType::Default);
    z_shader.texture_set_ref = z_set_block as u32;
    let z_shader_block = nif.add_block("BSLightingShaderProperty", Block::LightingShader(z_shader));
    let mut z_shape = TriShape::new();
    z_shape.name_ref = z_name;
    z_shape.shader_ref = z_shader_block as u32;
    nif.add_block("BSTriShape", Block::TriShape(z_shape));

    // "AShape" second: set(3), shader(4), shape(5)
    let a_name = nif.add_string("AShape");
    let mut a_set = ShaderTextureSet::new();
    a_set.textures[0] = "textures\\a_d.dds".to_string();
    let a_set_block = nif.add_block("BSShaderTextureSet", Block::TextureSet(a_set));
    let mut a_shader = LightingShaderProperty::new(LightingShaderType::Default);
    a_shader.texture_set_ref = a_set_block as u32;
    let a_shader_block = nif.add_block("BSLightingShaderProperty", Block::LightingShader(a_shader));
    let mut a_shape = TriShape::new();
    a_shape.name_ref = a_name;
    a_shape.shader_ref = a_shader_block as u32;
    nif.add_block("BSTriShape", Block::TriShape(a_shape));

    nif
}

#[test]
fn sort_blocks_reorders_shapes_by_name_and_remaps_refs() -> Result<(), anyhow::Error> {
    let mut nif = two_shape_nif_out_of_name_order();

    // pre-sort: ZShape holds 3D index 0
    let shapes = nif.shapes();
    assert_eq!(nif.block_display_name(shapes[0].0), "ZShape");

    let mapping = nif.sort_blocks();

    // post-sort: AShape leads, and the old ZShape block maps to the later id
    let sorted = nif.shapes();
    assert_eq!(nif.block_display_name(sorted[0].0), "AShape");
    assert_eq!(nif.block_display_name(sorted[1].0), "ZShape");
    assert_eq!(mapping[shapes[0].0], sorted[1].0);

    // refs were remapped: each shape still resolves its own textures
    assert_eq!(nif.texture_slots(sorted[0].0)[0], "textures\\a_d.dds");
    assert_eq!(nif.texture_slots(sorted[1].0)[0], "textures\\z_d.dds");

    // sorted output round-trips and stays sorted
    let bytes = NifWriter::write(&nif)?;
    let parsed = NifReader::parse(&bytes, true)?;
    assert_eq!(parsed.block_display_name(parsed.shapes()[0].0), "AShape");
    assert_eq!(parsed.texture_slots(parsed.shapes()[1].0)[0], "textures\\z_d.dds");

    // a second sort is a fixpoint
    let mapping2 = parsed.clone().sort_blocks();
    assert_eq!(mapping2, (0..parsed.blocks.len()).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn sort_blocks_leaves_files_with_opaque_blocks_alone() {
    let mut nif = two_shape_nif_out_of_name_order();
    nif.add_block(
        "NiNode",
        Block::Unknown(crate::nif::types::UnknownBlock {
            data: vec![0x01, 0x02],
        }),
    );

    let before = nif.blocks.clone();
    let mapping = nif.sort_blocks();

    assert_eq!(mapping, (0..nif.blocks.len()).collect::<Vec<_>>());
    assert_eq!(nif.blocks, before);
    assert_eq!(nif.block_display_name(nif.shapes()[0].0), "ZShape");
}

#[test]
fn flag_setters_report_changes() {
    let mut shader = LightingShaderProperty::new(LightingShaderType::Default);

    assert!(shader.set_flag1(ShaderFlags1::PARALLAX, true));
    assert!(!shader.set_flag1(ShaderFlags1::PARALLAX, true));
    assert!(shader.set_flag1(ShaderFlags1::PARALLAX, false));

    assert!(shader.set_flag2(ShaderFlags2::MULTI_LAYER_PARALLAX, true));
    assert!(shader.flags2.contains(ShaderFlags2::MULTI_LAYER_PARALLAX));
}
