use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::dds::types::{AlphaMode, DecodedImage};
use crate::ParserError;

const DDS_MAGIC: u32 = 0x2053_4444;
const DDPF_FOURCC: u32 = 0x4;
const FOURCC_DX10: u32 = u32::from_le_bytes(*b"DX10");
const DXGI_R8G8B8A8_UNORM: u32 = 28;

const DDSD_CAPS: u32 = 0x1;
const DDSD_HEIGHT: u32 = 0x2;
const DDSD_WIDTH: u32 = 0x4;
const DDSD_PIXELFORMAT: u32 = 0x1000;
const DDSD_MIPMAPCOUNT: u32 = 0x20000;
const DDSCAPS_TEXTURE: u32 = 0x1000;
const DDSCAPS_MIPMAP: u32 = 0x40_0000;
const DDSCAPS_COMPLEX: u32 = 0x8;

pub struct DdsWriter {}

impl DdsWriter {
    /// Writes an RGBA8 texture with the supplied mip chain (largest first)
    /// under a DX10 header.
    pub fn write_rgba8(mips: &[DecodedImage], alpha_mode: AlphaMode) -> Result<Vec<u8>, ParserError> {
        if mips.is_empty() {
            return Err(ParserError::EmptySource);
        }

        let top = &mips[0];
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(DDS_MAGIC)?;
        out.write_u32::<LittleEndian>(124)?;

        let mut flags = DDSD_CAPS | DDSD_HEIGHT | DDSD_WIDTH | DDSD_PIXELFORMAT;
        if mips.len() > 1 {
            flags |= DDSD_MIPMAPCOUNT;
        }
        out.write_u32::<LittleEndian>(flags)?;
        out.write_u32::<LittleEndian>(top.height)?;
        out.write_u32::<LittleEndian>(top.width)?;
        out.write_u32::<LittleEndian>(top.width * 4)?; // pitch
        out.write_u32::<LittleEndian>(0)?; // depth
        out.write_u32::<LittleEndian>(mips.len() as u32)?;
        for _ in 0..11 {
            out.write_u32::<LittleEndian>(0)?;
        }

        // pixel format: DX10 extension
        out.write_u32::<LittleEndian>(32)?;
        out.write_u32::<LittleEndian>(DDPF_FOURCC)?;
        out.write_u32::<LittleEndian>(FOURCC_DX10)?;
        for _ in 0..5 {
            out.write_u32::<LittleEndian>(0)?;
        }

        let mut caps = DDSCAPS_TEXTURE;
        if mips.len() > 1 {
            caps |= DDSCAPS_MIPMAP | DDSCAPS_COMPLEX;
        }
        out.write_u32::<LittleEndian>(caps)?;
        for _ in 0..4 {
            out.write_u32::<LittleEndian>(0)?;
        }

        // DX10 header
        out.write_u32::<LittleEndian>(DXGI_R8G8B8A8_UNORM)?;
        out.write_u32::<LittleEndian>(3)?; // TEXTURE2D
        out.write_u32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(1)?; // array size
        let misc_flags2 = match alpha_mode {
            AlphaMode::Unknown => 0,
            AlphaMode::Straight => 1,
            AlphaMode::Premultiplied => 2,
            AlphaMode::Opaque => 3,
            AlphaMode::Custom => 4,
        };
        out.write_u32::<LittleEndian>(misc_flags2)?;

        for mip in mips {
            out.write_all(&mip.rgba)?;
        }

        Ok(out)
    }
}
