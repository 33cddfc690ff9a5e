use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::ParserError;

pub(crate) trait Parseable<T> {
    fn parse<R: Read>(rdr: &mut R) -> Result<T, ParserError>;
}

impl Parseable<u8> for u8 {
    fn parse<R: Read>(rdr: &mut R) -> Result<u8, ParserError> {
        Ok(rdr.read_u8()?)
    }
}

impl Parseable<u16> for u16 {
    fn parse<R: Read>(rdr: &mut R) -> Result<u16, ParserError> {
        Ok(rdr.read_u16::<LittleEndian>()?)
    }
}

impl Parseable<u32> for u32 {
    fn parse<R: Read>(rdr: &mut R) -> Result<u32, ParserError> {
        Ok(rdr.read_u32::<LittleEndian>()?)
    }
}

impl Parseable<u64> for u64 {
    fn parse<R: Read>(rdr: &mut R) -> Result<u64, ParserError> {
        Ok(rdr.read_u64::<LittleEndian>()?)
    }
}

impl Parseable<f32> for f32 {
    fn parse<R: Read>(rdr: &mut R) -> Result<f32, ParserError> {
        Ok(rdr.read_f32::<LittleEndian>()?)
    }
}

/// u32-length-prefixed string, the framing Gamebryo uses for header strings,
/// block type names and texture-set entries.
pub(crate) fn read_sized_string<R: Read>(rdr: &mut R) -> Result<String, ParserError> {
    let len = rdr.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    rdr.read_exact(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}

pub(crate) fn write_sized_string<W: Write>(wtr: &mut W, value: &str) -> Result<(), ParserError> {
    wtr.write_u32::<LittleEndian>(value.len() as u32)?;
    wtr.write_all(value.as_bytes())?;
    Ok(())
}

/// u8-length-prefixed string including the null terminator ("ShortString" in
/// the NIF export info).
pub(crate) fn read_short_string<R: Read>(rdr: &mut R) -> Result<String, ParserError> {
    let len = rdr.read_u8()? as usize;
    let mut buf = vec![0u8; len];
    rdr.read_exact(&mut buf)?;
    if buf.last() == Some(&0) {
        buf.pop();
    }
    Ok(String::from_utf8(buf)?)
}

pub(crate) fn write_short_string<W: Write>(wtr: &mut W, value: &str) -> Result<(), ParserError> {
    wtr.write_u8((value.len() + 1) as u8)?;
    wtr.write_all(value.as_bytes())?;
    wtr.write_u8(0)?;
    Ok(())
}

/// Null-terminated string ("zstring" in the plugin record format).
pub(crate) fn write_zstring<W: Write>(wtr: &mut W, value: &str) -> Result<(), ParserError> {
    wtr.write_all(value.as_bytes())?;
    wtr.write_u8(0)?;
    Ok(())
}
