use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::common::reader::write_zstring;
use crate::esp::types::{PluginDescriptor, TxstRecord};
use crate::ParserError;

const TES4_FLAG_ESM: u32 = 0x1;
const GROUP_HEADER_SIZE: u32 = 24;

pub struct EspWriter {}

impl EspWriter {
    pub fn write(descriptor: &PluginDescriptor, records: &[TxstRecord]) -> Result<Vec<u8>, ParserError> {
        let mut out = Vec::new();
        Self::write_tes4(&mut out, descriptor, records.len() as u32)?;
        if !records.is_empty() {
            Self::write_txst_group(&mut out, records)?;
        }
        Ok(out)
    }

    fn write_subrecord(out: &mut Vec<u8>, tag: &[u8; 4], data: &[u8]) -> Result<(), ParserError> {
        out.write_all(tag)?;
        out.write_u16::<LittleEndian>(data.len() as u16)?;
        out.write_all(data)?;
        Ok(())
    }

    fn write_record_header(
        out: &mut Vec<u8>,
        tag: &[u8; 4],
        data_size: u32,
        flags: u32,
        form_id: u32,
    ) -> Result<(), ParserError> {
        out.write_all(tag)?;
        out.write_u32::<LittleEndian>(data_size)?;
        out.write_u32::<LittleEndian>(flags)?;
        out.write_u32::<LittleEndian>(form_id)?;
        out.write_u32::<LittleEndian>(0)?; // vc info
        out.write_u16::<LittleEndian>(44)?; // internal version
        out.write_u16::<LittleEndian>(0)?;
        Ok(())
    }

    fn write_tes4(out: &mut Vec<u8>, descriptor: &PluginDescriptor, num_records: u32) -> Result<(), ParserError> {
        let mut data = Vec::new();

        let mut hedr = Vec::new();
        hedr.write_f32::<LittleEndian>(1.71)?;
        hedr.write_u32::<LittleEndian>(num_records)?;
        hedr.write_u32::<LittleEndian>(0x800)?; // next object id
        Self::write_subrecord(&mut data, b"HEDR", &hedr)?;

        let mut cnam = Vec::new();
        write_zstring(&mut cnam, &descriptor.author)?;
        Self::write_subrecord(&mut data, b"CNAM", &cnam)?;

        if !descriptor.description.is_empty() {
            let mut snam = Vec::new();
            write_zstring(&mut snam, &descriptor.description)?;
            Self::write_subrecord(&mut data, b"SNAM", &snam)?;
        }

        for master in &descriptor.masters {
            let mut mast = Vec::new();
            write_zstring(&mut mast, master)?;
            Self::write_subrecord(&mut data, b"MAST", &mast)?;
            Self::write_subrecord(&mut data, b"DATA", &0u64.to_le_bytes())?;
        }

        let flags = if descriptor.esm { TES4_FLAG_ESM } else { 0 };
        Self::write_record_header(out, b"TES4", data.len() as u32, flags, 0)?;
        out.write_all(&data)?;
        Ok(())
    }

    fn write_txst_record(record: &TxstRecord) -> Result<Vec<u8>, ParserError> {
        let mut data = Vec::new();

        let mut edid = Vec::new();
        write_zstring(&mut edid, &record.edid)?;
        Self::write_subrecord(&mut data, b"EDID", &edid)?;

        // object bounds, required by the record type, zeroed for texture sets
        Self::write_subrecord(&mut data, b"OBND", &[0u8; 12])?;

        const SLOT_TAGS: [&[u8; 4]; 8] = [b"TX00", b"TX01", b"TX02", b"TX03", b"TX04", b"TX05", b"TX06", b"TX07"];
        for (slot, tag) in record.slots.iter().take(8).zip(SLOT_TAGS) {
            if slot.is_empty() {
                continue;
            }
            let mut tx = Vec::new();
            write_zstring(&mut tx, slot)?;
            Self::write_subrecord(&mut data, tag, &tx)?;
        }

        // DNAM flags (no specular map by default)
        Self::write_subrecord(&mut data, b"DNAM", &0u16.to_le_bytes())?;

        let mut out = Vec::new();
        Self::write_record_header(&mut out, b"TXST", data.len() as u32, 0, record.form_id)?;
        out.write_all(&data)?;
        Ok(out)
    }

    fn write_txst_group(out: &mut Vec<u8>, records: &[TxstRecord]) -> Result<(), ParserError> {
        let mut bodies = Vec::new();
        let mut total = 0u32;
        for record in records {
            let body = Self::write_txst_record(record)?;
            total += body.len() as u32;
            bodies.push(body);
        }

        out.write_all(b"GRUP")?;
        out.write_u32::<LittleEndian>(GROUP_HEADER_SIZE + total)?;
        out.write_all(b"TXST")?;
        out.write_u32::<LittleEndian>(0)?; // top-level group
        out.write_u32::<LittleEndian>(0)?; // stamp
        out.write_u32::<LittleEndian>(0)?;

        for body in bodies {
            out.write_all(&body)?;
        }
        Ok(())
    }
}
