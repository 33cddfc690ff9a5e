use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::common::reader::{write_short_string, write_sized_string};
use crate::nif::types::{Block, EffectShaderProperty, LightingShaderProperty, NifFile, ShaderTextureSet, TriShape};
use crate::ParserError;

pub struct NifWriter {}

impl NifWriter {
    pub fn write(nif: &NifFile) -> Result<Vec<u8>, ParserError> {
        // Serialize blocks first so the header's size table is exact.
        let mut block_bodies = Vec::with_capacity(nif.blocks.len());
        for nif_block in &nif.blocks {
            block_bodies.push(Self::write_block(&nif_block.block)?);
        }

        // Block type table, first-use order.
        let mut type_names: Vec<&str> = Vec::new();
        let mut type_indices = Vec::with_capacity(nif.blocks.len());
        for nif_block in &nif.blocks {
            let idx = match type_names.iter().position(|n| *n == nif_block.type_name) {
                Some(idx) => idx,
                None => {
                    type_names.push(&nif_block.type_name);
                    type_names.len() - 1
                }
            };
            type_indices.push(idx as u16);
        }

        let mut out = Vec::new();
        out.write_all(b"Gamebryo File Format, Version 20.2.0.7\n")?;
        out.write_u32::<LittleEndian>(0x1402_0007)?;
        out.write_u8(1)?; // little endian
        out.write_u32::<LittleEndian>(nif.user_version)?;
        out.write_u32::<LittleEndian>(nif.blocks.len() as u32)?;
        out.write_u32::<LittleEndian>(nif.bs_version)?;

        write_short_string(&mut out, &nif.author)?;
        write_short_string(&mut out, &nif.process_script)?;
        write_short_string(&mut out, &nif.export_script)?;

        out.write_u16::<LittleEndian>(type_names.len() as u16)?;
        for name in &type_names {
            write_sized_string(&mut out, name)?;
        }
        for idx in &type_indices {
            out.write_u16::<LittleEndian>(*idx)?;
        }
        for body in &block_bodies {
            out.write_u32::<LittleEndian>(body.len() as u32)?;
        }

        out.write_u32::<LittleEndian>(nif.strings.len() as u32)?;
        let max_len = nif.strings.iter().map(String::len).max().unwrap_or(0);
        out.write_u32::<LittleEndian>(max_len as u32)?;
        for string in &nif.strings {
            write_sized_string(&mut out, string)?;
        }

        out.write_u32::<LittleEndian>(0)?; // groups

        for body in block_bodies {
            out.write_all(&body)?;
        }

        Ok(out)
    }

    fn write_block(block: &Block) -> Result<Vec<u8>, ParserError> {
        let mut out = Vec::new();
        match block {
            Block::TriShape(shape) => Self::write_tri_shape(&mut out, shape)?,
            Block::LightingShader(shader) => Self::write_lighting_shader(&mut out, shader)?,
            Block::EffectShader(shader) => Self::write_effect_shader(&mut out, shader)?,
            Block::TextureSet(set) => Self::write_texture_set(&mut out, set)?,
            Block::Unknown(raw) => out.write_all(&raw.data)?,
        }
        Ok(out)
    }

    fn write_ref_list(out: &mut Vec<u8>, refs: &[u32]) -> Result<(), ParserError> {
        out.write_u32::<LittleEndian>(refs.len() as u32)?;
        for r in refs {
            out.write_u32::<LittleEndian>(*r)?;
        }
        Ok(())
    }

    fn write_tri_shape(out: &mut Vec<u8>, shape: &TriShape) -> Result<(), ParserError> {
        out.write_u32::<LittleEndian>(shape.name_ref)?;
        Self::write_ref_list(out, &shape.extra_refs)?;
        out.write_u32::<LittleEndian>(shape.controller_ref)?;
        out.write_u32::<LittleEndian>(shape.flags)?;
        for v in shape.translation {
            out.write_f32::<LittleEndian>(v)?;
        }
        for v in shape.rotation {
            out.write_f32::<LittleEndian>(v)?;
        }
        out.write_f32::<LittleEndian>(shape.scale)?;
        out.write_u32::<LittleEndian>(shape.collision_ref)?;
        for v in shape.bounding_sphere {
            out.write_f32::<LittleEndian>(v)?;
        }
        out.write_u32::<LittleEndian>(shape.skin_ref)?;
        out.write_u32::<LittleEndian>(shape.shader_ref)?;
        out.write_u32::<LittleEndian>(shape.alpha_ref)?;
        out.write_u64::<LittleEndian>(shape.vertex_desc)?;
        out.write_all(&shape.tail)?;
        Ok(())
    }

    fn write_lighting_shader(out: &mut Vec<u8>, shader: &LightingShaderProperty) -> Result<(), ParserError> {
        out.write_u32::<LittleEndian>(shader.shader_type.into())?;
        out.write_u32::<LittleEndian>(shader.name_ref)?;
        Self::write_ref_list(out, &shader.extra_refs)?;
        out.write_u32::<LittleEndian>(shader.controller_ref)?;
        out.write_u32::<LittleEndian>(shader.flags1.bits())?;
        out.write_u32::<LittleEndian>(shader.flags2.bits())?;
        for v in shader.uv_offset {
            out.write_f32::<LittleEndian>(v)?;
        }
        for v in shader.uv_scale {
            out.write_f32::<LittleEndian>(v)?;
        }
        out.write_u32::<LittleEndian>(shader.texture_set_ref)?;
        for v in shader.emissive_color {
            out.write_f32::<LittleEndian>(v)?;
        }
        out.write_f32::<LittleEndian>(shader.emissive_mult)?;
        out.write_u32::<LittleEndian>(shader.texture_clamp_mode)?;
        out.write_f32::<LittleEndian>(shader.alpha)?;
        out.write_f32::<LittleEndian>(shader.refraction_strength)?;
        out.write_f32::<LittleEndian>(shader.glossiness)?;
        for v in shader.specular_color {
            out.write_f32::<LittleEndian>(v)?;
        }
        out.write_f32::<LittleEndian>(shader.specular_strength)?;
        out.write_f32::<LittleEndian>(shader.lighting_effect1)?;
        out.write_f32::<LittleEndian>(shader.lighting_effect2)?;
        if let Some(scale) = shader.env_map_scale {
            out.write_f32::<LittleEndian>(scale)?;
        }
        out.write_all(&shader.tail)?;
        Ok(())
    }

    fn write_effect_shader(out: &mut Vec<u8>, shader: &EffectShaderProperty) -> Result<(), ParserError> {
        out.write_u32::<LittleEndian>(shader.name_ref)?;
        Self::write_ref_list(out, &shader.extra_refs)?;
        out.write_u32::<LittleEndian>(shader.controller_ref)?;
        out.write_u32::<LittleEndian>(shader.flags1.bits())?;
        out.write_u32::<LittleEndian>(shader.flags2.bits())?;
        for v in shader.uv_offset {
            out.write_f32::<LittleEndian>(v)?;
        }
        for v in shader.uv_scale {
            out.write_f32::<LittleEndian>(v)?;
        }
        write_sized_string(out, &shader.source_texture)?;
        out.write_u32::<LittleEndian>(shader.texture_clamp_mode)?;
        out.write_all(&shader.tail)?;
        Ok(())
    }

    fn write_texture_set(out: &mut Vec<u8>, set: &ShaderTextureSet) -> Result<(), ParserError> {
        out.write_u32::<LittleEndian>(set.textures.len() as u32)?;
        for texture in &set.textures {
            write_sized_string(out, texture)?;
        }
        Ok(())
    }
}
