use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::dds::types::{AlphaMode, DdsFormat, DdsMetadata, DecodedImage};
use crate::ParserError;

const DDS_MAGIC: u32 = 0x2053_4444; // "DDS "
const HEADER_SIZE: u32 = 124;
const PIXELFORMAT_SIZE: u32 = 32;

const DDPF_FOURCC: u32 = 0x4;

const FOURCC_DXT1: u32 = u32::from_le_bytes(*b"DXT1");
const FOURCC_DXT3: u32 = u32::from_le_bytes(*b"DXT3");
const FOURCC_DXT5: u32 = u32::from_le_bytes(*b"DXT5");
const FOURCC_DX10: u32 = u32::from_le_bytes(*b"DX10");

pub struct DdsReader {}

struct RawHeader {
    height: u32,
    width: u32,
    mip_levels: u32,
    pf_flags: u32,
    fourcc: u32,
    rgb_bit_count: u32,
    r_mask: u32,
    b_mask: u32,
}

impl DdsReader {
    /// Header-only parse; cheap enough to sit behind a read-through cache.
    pub fn parse_metadata(bytes: &[u8]) -> Result<DdsMetadata, ParserError> {
        let mut rdr = Cursor::new(bytes);
        let (_, metadata) = Self::parse_header(&mut rdr)?;
        Ok(metadata)
    }

    fn parse_header(rdr: &mut Cursor<&[u8]>) -> Result<(RawHeader, DdsMetadata), ParserError> {
        let magic = rdr.read_u32::<LittleEndian>()?;
        if magic != DDS_MAGIC {
            return Err(ParserError::InvalidMagicValue { magic });
        }

        let size = rdr.read_u32::<LittleEndian>()?;
        if size != HEADER_SIZE {
            return Err(ParserError::FormatError {
                reason: "DDS header size mismatch",
            });
        }

        let _flags = rdr.read_u32::<LittleEndian>()?;
        let height = rdr.read_u32::<LittleEndian>()?;
        let width = rdr.read_u32::<LittleEndian>()?;
        let _pitch = rdr.read_u32::<LittleEndian>()?;
        let _depth = rdr.read_u32::<LittleEndian>()?;
        let mip_levels = rdr.read_u32::<LittleEndian>()?.max(1);
        for _ in 0..11 {
            let _ = rdr.read_u32::<LittleEndian>()?;
        }

        let pf_size = rdr.read_u32::<LittleEndian>()?;
        if pf_size != PIXELFORMAT_SIZE {
            return Err(ParserError::FormatError {
                reason: "DDS pixel format size mismatch",
            });
        }
        let pf_flags = rdr.read_u32::<LittleEndian>()?;
        let fourcc = rdr.read_u32::<LittleEndian>()?;
        let rgb_bit_count = rdr.read_u32::<LittleEndian>()?;
        let r_mask = rdr.read_u32::<LittleEndian>()?;
        let _g_mask = rdr.read_u32::<LittleEndian>()?;
        let b_mask = rdr.read_u32::<LittleEndian>()?;
        let _a_mask = rdr.read_u32::<LittleEndian>()?;

        for _ in 0..5 {
            // caps1..4 + reserved2
            let _ = rdr.read_u32::<LittleEndian>()?;
        }

        let raw = RawHeader {
            height,
            width,
            mip_levels,
            pf_flags,
            fourcc,
            rgb_bit_count,
            r_mask,
            b_mask,
        };

        let (format, dxgi_format, alpha_mode) = if raw.pf_flags & DDPF_FOURCC != 0 && raw.fourcc == FOURCC_DX10 {
            let dxgi = rdr.read_u32::<LittleEndian>()?;
            let _resource_dimension = rdr.read_u32::<LittleEndian>()?;
            let _misc_flag = rdr.read_u32::<LittleEndian>()?;
            let _array_size = rdr.read_u32::<LittleEndian>()?;
            let misc_flags2 = rdr.read_u32::<LittleEndian>()?;
            (Self::format_from_dxgi(dxgi), dxgi, AlphaMode::from(misc_flags2))
        } else if raw.pf_flags & DDPF_FOURCC != 0 {
            let format = match raw.fourcc {
                FOURCC_DXT1 => DdsFormat::Bc1,
                FOURCC_DXT3 => DdsFormat::Bc2,
                FOURCC_DXT5 => DdsFormat::Bc3,
                _ => DdsFormat::Other,
            };
            (format, 0, AlphaMode::Unknown)
        } else {
            // uncompressed, distinguished by the channel masks
            let format = match (raw.rgb_bit_count, raw.r_mask, raw.b_mask) {
                (32, 0x0000_00ff, 0x00ff_0000) => DdsFormat::Rgba8,
                (32, 0x00ff_0000, 0x0000_00ff) => DdsFormat::Bgra8,
                _ => DdsFormat::Other,
            };
            (format, 0, AlphaMode::Unknown)
        };

        let metadata = DdsMetadata {
            width: raw.width,
            height: raw.height,
            mip_levels: raw.mip_levels,
            format,
            dxgi_format,
            alpha_mode,
        };

        Ok((raw, metadata))
    }

    fn format_from_dxgi(dxgi: u32) -> DdsFormat {
        match dxgi {
            70..=72 => DdsFormat::Bc1,
            73..=75 => DdsFormat::Bc2,
            76..=78 => DdsFormat::Bc3,
            97..=99 => DdsFormat::Bc7,
            27..=32 => DdsFormat::Rgba8,
            87 | 90 | 91 => DdsFormat::Bgra8,
            9..=14 => DdsFormat::Rgba16,
            1..=4 => DdsFormat::Rgba32F,
            23..=25 => DdsFormat::Rgb10A2,
            _ => DdsFormat::Other,
        }
    }

    /// Decodes the top-level mip to RGBA8. Fails for formats outside
    /// [`DdsFormat::is_decodable`].
    pub fn decode_rgba(bytes: &[u8]) -> Result<(DdsMetadata, DecodedImage), ParserError> {
        let mut rdr = Cursor::new(bytes);
        let (_raw, metadata) = Self::parse_header(&mut rdr)?;

        let width = metadata.width;
        let height = metadata.height;

        let image = match metadata.format {
            DdsFormat::Rgba8 | DdsFormat::Bgra8 => {
                let mut data = vec![0u8; (width * height * 4) as usize];
                rdr.read_exact(&mut data)?;
                if metadata.format == DdsFormat::Bgra8 {
                    for px in data.chunks_exact_mut(4) {
                        px.swap(0, 2);
                    }
                }
                DecodedImage {
                    width,
                    height,
                    rgba: data,
                }
            }
            DdsFormat::Bc1 => Self::decode_bc(&mut rdr, width, height, 8, decode_bc1_block)?,
            DdsFormat::Bc2 => Self::decode_bc(&mut rdr, width, height, 16, decode_bc2_block)?,
            DdsFormat::Bc3 => Self::decode_bc(&mut rdr, width, height, 16, decode_bc3_block)?,
            _ => {
                return Err(ParserError::FormatError {
                    reason: "format not supported for full decode",
                })
            }
        };

        Ok((metadata, image))
    }

    fn decode_bc<R: Read>(
        rdr: &mut R,
        width: u32,
        height: u32,
        block_bytes: usize,
        decode_block: fn(&[u8]) -> [[u8; 4]; 16],
    ) -> Result<DecodedImage, ParserError> {
        let mut image = DecodedImage::new(width, height);
        let blocks_x = width.div_ceil(4);
        let blocks_y = height.div_ceil(4);

        let mut block = vec![0u8; block_bytes];
        for by in 0..blocks_y {
            for bx in 0..blocks_x {
                rdr.read_exact(&mut block)?;
                let texels = decode_block(&block);
                for ty in 0..4u32 {
                    for tx in 0..4u32 {
                        let x = bx * 4 + tx;
                        let y = by * 4 + ty;
                        if x < width && y < height {
                            image.set_pixel(x, y, texels[(ty * 4 + tx) as usize]);
                        }
                    }
                }
            }
        }

        Ok(image)
    }
}

fn rgb565(value: u16) -> [u8; 3] {
    let r = ((value >> 11) & 0x1f) as u32;
    let g = ((value >> 5) & 0x3f) as u32;
    let b = (value & 0x1f) as u32;
    [
        ((r * 255 + 15) / 31) as u8,
        ((g * 255 + 31) / 63) as u8,
        ((b * 255 + 15) / 31) as u8,
    ]
}

fn decode_color_block(block: &[u8], opaque_mode: bool) -> [[u8; 4]; 16] {
    let c0 = u16::from_le_bytes([block[0], block[1]]);
    let c1 = u16::from_le_bytes([block[2], block[3]]);
    let rgb0 = rgb565(c0);
    let rgb1 = rgb565(c1);

    let mut palette = [[0u8; 4]; 4];
    palette[0] = [rgb0[0], rgb0[1], rgb0[2], 255];
    palette[1] = [rgb1[0], rgb1[1], rgb1[2], 255];

    if c0 > c1 || opaque_mode {
        for i in 0..3 {
            palette[2][i] = ((2 * rgb0[i] as u32 + rgb1[i] as u32) / 3) as u8;
            palette[3][i] = ((rgb0[i] as u32 + 2 * rgb1[i] as u32) / 3) as u8;
        }
        palette[2][3] = 255;
        palette[3][3] = 255;
    } else {
        for i in 0..3 {
            palette[2][i] = ((rgb0[i] as u32 + rgb1[i] as u32) / 2) as u8;
        }
        palette[2][3] = 255;
        palette[3] = [0, 0, 0, 0];
    }

    let indices = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
    let mut out = [[0u8; 4]; 16];
    for (i, texel) in out.iter_mut().enumerate() {
        let idx = ((indices >> (2 * i)) & 0x3) as usize;
        *texel = palette[idx];
    }
    out
}

fn decode_bc1_block(block: &[u8]) -> [[u8; 4]; 16] {
    decode_color_block(block, false)
}

fn decode_bc2_block(block: &[u8]) -> [[u8; 4]; 16] {
    let mut out = decode_color_block(&block[8..16], true);
    let alpha = u64::from_le_bytes(block[0..8].try_into().unwrap());
    for (i, texel) in out.iter_mut().enumerate() {
        let a4 = ((alpha >> (4 * i)) & 0xf) as u32;
        texel[3] = (a4 * 255 / 15) as u8;
    }
    out
}

fn decode_bc3_block(block: &[u8]) -> [[u8; 4]; 16] {
    let mut out = decode_color_block(&block[8..16], true);

    let a0 = block[0] as u32;
    let a1 = block[1] as u32;
    let mut palette = [0u8; 8];
    palette[0] = a0 as u8;
    palette[1] = a1 as u8;
    if a0 > a1 {
        for i in 1..7u32 {
            palette[(i + 1) as usize] = (((7 - i) * a0 + i * a1) / 7) as u8;
        }
    } else {
        for i in 1..5u32 {
            palette[(i + 1) as usize] = (((5 - i) * a0 + i * a1) / 5) as u8;
        }
        palette[6] = 0;
        palette[7] = 255;
    }

    let mut index_bits = 0u64;
    for (i, byte) in block[2..8].iter().enumerate() {
        index_bits |= (*byte as u64) << (8 * i);
    }
    for (i, texel) in out.iter_mut().enumerate() {
        let idx = ((index_bits >> (3 * i)) & 0x7) as usize;
        texel[3] = palette[idx];
    }
    out
}
