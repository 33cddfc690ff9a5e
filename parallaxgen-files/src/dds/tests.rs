use crate::dds::reader::DdsReader;
use crate::dds::writer::DdsWriter;
use crate::dds::{AlphaMode, DdsFormat, DecodedImage};

fn checkered_image(width: u32, height: u32) -> DecodedImage {
    let mut image = DecodedImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let value = if (x + y) % 2 == 0 { [255, 0, 0, 255] } else { [0, 0, 255, 64] };
            image.set_pixel(x, y, value);
        }
    }
    image
}

#[test]
fn rgba8_roundtrip() -> Result<(), anyhow::Error> {
    let image = checkered_image(8, 4);
    let bytes = DdsWriter::write_rgba8(std::slice::from_ref(&image), AlphaMode::Straight)?;

    let metadata = DdsReader::parse_metadata(&bytes)?;
    assert_eq!(metadata.width, 8);
    assert_eq!(metadata.height, 4);
    assert_eq!(metadata.mip_levels, 1);
    assert_eq!(metadata.format, DdsFormat::Rgba8);
    assert_eq!(metadata.alpha_mode, AlphaMode::Straight);

    let (_, decoded) = DdsReader::decode_rgba(&bytes)?;
    assert_eq!(decoded, image);
    Ok(())
}

#[test]
fn opaque_alpha_mode_is_preserved() -> Result<(), anyhow::Error> {
    let image = checkered_image(4, 4);
    let bytes = DdsWriter::write_rgba8(std::slice::from_ref(&image), AlphaMode::Opaque)?;
    let metadata = DdsReader::parse_metadata(&bytes)?;
    assert_eq!(metadata.alpha_mode, AlphaMode::Opaque);
    Ok(())
}

#[test]
fn mip_chain_is_counted() -> Result<(), anyhow::Error> {
    let mips = vec![checkered_image(8, 8), checkered_image(4, 4), checkered_image(2, 2)];
    let bytes = DdsWriter::write_rgba8(&mips, AlphaMode::Straight)?;
    let metadata = DdsReader::parse_metadata(&bytes)?;
    assert_eq!(metadata.mip_levels, 3);
    Ok(())
}

#[test]
fn bc3_block_decodes_alpha_ramp() {
    // BC3 block: alpha endpoints 255/0 with all indices 0 -> alpha 255, color
    // endpoints both black.
    let mut block = [0u8; 16];
    block[0] = 255;
    block[1] = 0;
    // color block (bytes 8..16) stays zero: c0 == c1 == black, indices 0

    // assemble a minimal 4x4 BC3 (DXT5) file by hand
    let mut bytes = Vec::new();
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::Write;
    bytes.write_u32::<LittleEndian>(0x2053_4444).unwrap();
    bytes.write_u32::<LittleEndian>(124).unwrap();
    bytes.write_u32::<LittleEndian>(0x1007).unwrap();
    bytes.write_u32::<LittleEndian>(4).unwrap(); // height
    bytes.write_u32::<LittleEndian>(4).unwrap(); // width
    bytes.write_u32::<LittleEndian>(16).unwrap();
    bytes.write_u32::<LittleEndian>(0).unwrap();
    bytes.write_u32::<LittleEndian>(1).unwrap();
    for _ in 0..11 {
        bytes.write_u32::<LittleEndian>(0).unwrap();
    }
    bytes.write_u32::<LittleEndian>(32).unwrap();
    bytes.write_u32::<LittleEndian>(0x4).unwrap(); // fourcc flag
    bytes.write_all(b"DXT5").unwrap();
    for _ in 0..5 {
        bytes.write_u32::<LittleEndian>(0).unwrap();
    }
    for _ in 0..5 {
        bytes.write_u32::<LittleEndian>(0).unwrap();
    }
    bytes.write_all(&block).unwrap();

    let (metadata, image) = DdsReader::decode_rgba(&bytes).unwrap();
    assert_eq!(metadata.format, DdsFormat::Bc3);
    for y in 0..4 {
        for x in 0..4 {
            assert_eq!(image.pixel(x, y), [0, 0, 0, 255]);
        }
    }
}

#[test]
fn truncated_header_is_an_error() {
    assert!(DdsReader::parse_metadata(&[0u8; 8]).is_err());
}
