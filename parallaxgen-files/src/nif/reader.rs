use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::common::reader::{read_short_string, read_sized_string, Parseable};
use crate::nif::types::{
    Block, EffectShaderProperty, LightingShaderProperty, LightingShaderType, NifBlock, NifFile, ShaderFlags1,
    ShaderFlags2, ShaderTextureSet, TriShape, UnknownBlock,
};
use crate::ParserError;

const SUPPORTED_VERSION: u32 = 0x1402_0007; // 20.2.0.7

pub struct NifReader {}

impl NifReader {
    /// Parses a NIF from an in-memory buffer. `run_checks` additionally
    /// enforces the ASCII constraint on texture slots, which callers that
    /// feed slot strings into path maps must request.
    pub fn parse(bytes: &[u8], run_checks: bool) -> Result<NifFile, ParserError> {
        if bytes.is_empty() {
            return Err(ParserError::EmptySource);
        }

        let mut rdr = Cursor::new(bytes);

        // Header line, newline terminated: "Gamebryo File Format, Version ..."
        let mut header_line = Vec::new();
        loop {
            let byte = rdr.read_u8()?;
            if byte == b'\n' {
                break;
            }
            header_line.push(byte);
            if header_line.len() > 128 {
                return Err(ParserError::FormatError {
                    reason: "header line is not newline terminated",
                });
            }
        }

        let header_line = String::from_utf8(header_line)?;
        if !header_line.starts_with("Gamebryo File Format") && !header_line.starts_with("NetImmerse File Format") {
            return Err(ParserError::FormatError {
                reason: "missing Gamebryo header line",
            });
        }

        let version = u32::parse(&mut rdr)?;
        if version != SUPPORTED_VERSION {
            return Err(ParserError::FormatError {
                reason: "unsupported NIF version",
            });
        }

        let endian = u8::parse(&mut rdr)?;
        if endian != 1 {
            return Err(ParserError::FormatError {
                reason: "big endian NIFs are not supported",
            });
        }

        let user_version = u32::parse(&mut rdr)?;
        let num_blocks = u32::parse(&mut rdr)? as usize;
        let bs_version = u32::parse(&mut rdr)?;

        let author = read_short_string(&mut rdr)?;
        let process_script = read_short_string(&mut rdr)?;
        let export_script = read_short_string(&mut rdr)?;

        let num_block_types = u16::parse(&mut rdr)? as usize;
        let mut block_type_names = Vec::with_capacity(num_block_types);
        for _ in 0..num_block_types {
            block_type_names.push(read_sized_string(&mut rdr)?);
        }

        let mut block_type_indices = Vec::with_capacity(num_blocks);
        for _ in 0..num_blocks {
            block_type_indices.push(u16::parse(&mut rdr)? as usize);
        }

        let mut block_sizes = Vec::with_capacity(num_blocks);
        for _ in 0..num_blocks {
            block_sizes.push(u32::parse(&mut rdr)? as usize);
        }

        let num_strings = u32::parse(&mut rdr)? as usize;
        let _max_string_length = u32::parse(&mut rdr)?;
        let mut strings = Vec::with_capacity(num_strings);
        for _ in 0..num_strings {
            strings.push(read_sized_string(&mut rdr)?);
        }

        let num_groups = u32::parse(&mut rdr)? as usize;
        for _ in 0..num_groups {
            let _ = u32::parse(&mut rdr)?;
        }

        let mut blocks = Vec::with_capacity(num_blocks);
        for (block_idx, type_idx) in block_type_indices.iter().enumerate() {
            let type_name = block_type_names
                .get(*type_idx)
                .ok_or(ParserError::FormatError {
                    reason: "block type index out of range",
                })?
                .clone();

            let size = block_sizes[block_idx];
            let mut data = vec![0u8; size];
            rdr.read_exact(&mut data)?;

            let block = Self::parse_block(&type_name, &data)?;
            blocks.push(NifBlock { type_name, block });
        }

        let nif = NifFile {
            user_version,
            bs_version,
            author,
            process_script,
            export_script,
            strings,
            blocks,
        };

        if run_checks {
            nif.validate_slots()?;
        }

        Ok(nif)
    }

    fn parse_block(type_name: &str, data: &[u8]) -> Result<Block, ParserError> {
        let mut rdr = Cursor::new(data);
        match type_name {
            "BSTriShape" | "BSLODTriShape" | "BSMeshLODTriShape" | "BSDynamicTriShape" | "BSSubIndexTriShape" => {
                Ok(Block::TriShape(Self::parse_tri_shape(&mut rdr, data)?))
            }
            "BSLightingShaderProperty" => Ok(Block::LightingShader(Self::parse_lighting_shader(&mut rdr, data)?)),
            "BSEffectShaderProperty" => Ok(Block::EffectShader(Self::parse_effect_shader(&mut rdr, data)?)),
            "BSShaderTextureSet" => Ok(Block::TextureSet(Self::parse_texture_set(&mut rdr)?)),
            _ => Ok(Block::Unknown(UnknownBlock { data: data.to_vec() })),
        }
    }

    fn read_ref_list<R: Read>(rdr: &mut R) -> Result<Vec<u32>, ParserError> {
        let count = u32::parse(rdr)? as usize;
        let mut refs = Vec::with_capacity(count);
        for _ in 0..count {
            refs.push(u32::parse(rdr)?);
        }
        Ok(refs)
    }

    fn remaining(rdr: &mut Cursor<&[u8]>, data: &[u8]) -> Vec<u8> {
        let pos = rdr.position() as usize;
        data[pos..].to_vec()
    }

    fn parse_tri_shape(rdr: &mut Cursor<&[u8]>, data: &[u8]) -> Result<TriShape, ParserError> {
        let name_ref = u32::parse(rdr)?;
        let extra_refs = Self::read_ref_list(rdr)?;
        let controller_ref = u32::parse(rdr)?;
        let flags = u32::parse(rdr)?;

        let mut translation = [0f32; 3];
        for v in &mut translation {
            *v = f32::parse(rdr)?;
        }
        let mut rotation = [0f32; 9];
        for v in &mut rotation {
            *v = f32::parse(rdr)?;
        }
        let scale = f32::parse(rdr)?;
        let collision_ref = u32::parse(rdr)?;

        let mut bounding_sphere = [0f32; 4];
        for v in &mut bounding_sphere {
            *v = f32::parse(rdr)?;
        }

        let skin_ref = u32::parse(rdr)?;
        let shader_ref = u32::parse(rdr)?;
        let alpha_ref = u32::parse(rdr)?;
        let vertex_desc = u64::parse(rdr)?;
        let tail = Self::remaining(rdr, data);

        Ok(TriShape {
            name_ref,
            extra_refs,
            controller_ref,
            flags,
            translation,
            rotation,
            scale,
            collision_ref,
            bounding_sphere,
            skin_ref,
            shader_ref,
            alpha_ref,
            vertex_desc,
            tail,
        })
    }

    fn parse_lighting_shader(rdr: &mut Cursor<&[u8]>, data: &[u8]) -> Result<LightingShaderProperty, ParserError> {
        let raw_type = u32::parse(rdr)?;
        let shader_type = LightingShaderType::try_from(raw_type).map_err(|_| ParserError::FormatError {
            reason: "unknown lighting shader type",
        })?;

        let name_ref = u32::parse(rdr)?;
        let extra_refs = Self::read_ref_list(rdr)?;
        let controller_ref = u32::parse(rdr)?;

        let flags1 = ShaderFlags1::from_bits_retain(u32::parse(rdr)?);
        let flags2 = ShaderFlags2::from_bits_retain(u32::parse(rdr)?);

        let uv_offset = [f32::parse(rdr)?, f32::parse(rdr)?];
        let uv_scale = [f32::parse(rdr)?, f32::parse(rdr)?];
        let texture_set_ref = u32::parse(rdr)?;

        let emissive_color = [f32::parse(rdr)?, f32::parse(rdr)?, f32::parse(rdr)?];
        let emissive_mult = f32::parse(rdr)?;
        let texture_clamp_mode = u32::parse(rdr)?;
        let alpha = f32::parse(rdr)?;
        let refraction_strength = f32::parse(rdr)?;
        let glossiness = f32::parse(rdr)?;
        let specular_color = [f32::parse(rdr)?, f32::parse(rdr)?, f32::parse(rdr)?];
        let specular_strength = f32::parse(rdr)?;
        let lighting_effect1 = f32::parse(rdr)?;
        let lighting_effect2 = f32::parse(rdr)?;

        let env_map_scale = if shader_type == LightingShaderType::EnvironmentMap {
            Some(f32::parse(rdr)?)
        } else {
            None
        };

        let tail = Self::remaining(rdr, data);

        Ok(LightingShaderProperty {
            shader_type,
            name_ref,
            extra_refs,
            controller_ref,
            flags1,
            flags2,
            uv_offset,
            uv_scale,
            texture_set_ref,
            emissive_color,
            emissive_mult,
            texture_clamp_mode,
            alpha,
            refraction_strength,
            glossiness,
            specular_color,
            specular_strength,
            lighting_effect1,
            lighting_effect2,
            env_map_scale,
            tail,
        })
    }

    fn parse_effect_shader(rdr: &mut Cursor<&[u8]>, data: &[u8]) -> Result<EffectShaderProperty, ParserError> {
        let name_ref = u32::parse(rdr)?;
        let extra_refs = Self::read_ref_list(rdr)?;
        let controller_ref = u32::parse(rdr)?;

        let flags1 = ShaderFlags1::from_bits_retain(u32::parse(rdr)?);
        let flags2 = ShaderFlags2::from_bits_retain(u32::parse(rdr)?);

        let uv_offset = [f32::parse(rdr)?, f32::parse(rdr)?];
        let uv_scale = [f32::parse(rdr)?, f32::parse(rdr)?];
        let source_texture = read_sized_string(rdr)?;
        let texture_clamp_mode = u32::parse(rdr)?;
        let tail = Self::remaining(rdr, data);

        Ok(EffectShaderProperty {
            name_ref,
            extra_refs,
            controller_ref,
            flags1,
            flags2,
            uv_offset,
            uv_scale,
            source_texture,
            texture_clamp_mode,
            tail,
        })
    }

    fn parse_texture_set(rdr: &mut Cursor<&[u8]>) -> Result<ShaderTextureSet, ParserError> {
        let count = u32::parse(rdr)? as usize;
        let mut textures = Vec::with_capacity(count);
        for _ in 0..count {
            textures.push(read_sized_string(rdr)?);
        }
        Ok(ShaderTextureSet { textures })
    }
}
