use std::collections::BTreeMap;
use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

/// Writes version-104 archives with uncompressed entries. Primarily test
/// tooling: real load orders ship with archives from other packers, but the
/// reader needs something to chew on and fixtures want to be tiny.
#[derive(Default)]
pub struct ArchiveBuilder {
    // folder -> (file name -> data), sorted for deterministic output
    folders: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `path` is the internal path, backslash separated.
    pub fn add_file(&mut self, path: &str, data: Vec<u8>) -> &mut Self {
        let lower = path.to_lowercase();
        let (folder, file) = match lower.rfind('\\') {
            Some(idx) => (lower[..idx].to_string(), lower[idx + 1..].to_string()),
            None => (String::new(), lower),
        };
        self.folders.entry(folder).or_default().insert(file, data);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let folder_count = self.folders.len() as u32;
        let file_count: u32 = self.folders.values().map(|f| f.len() as u32).sum();

        let total_folder_name_length: u32 = self.folders.keys().map(|n| n.len() as u32 + 1).sum();
        let total_file_name_length: u32 = self
            .folders
            .values()
            .flat_map(|f| f.keys())
            .map(|n| n.len() as u32 + 1)
            .sum();

        let mut out = Vec::new();
        out.write_all(b"BSA\0").unwrap();
        out.write_u32::<LittleEndian>(104).unwrap();
        out.write_u32::<LittleEndian>(36).unwrap();
        out.write_u32::<LittleEndian>(0x1 | 0x2).unwrap(); // dir + file names
        out.write_u32::<LittleEndian>(folder_count).unwrap();
        out.write_u32::<LittleEndian>(file_count).unwrap();
        out.write_u32::<LittleEndian>(total_folder_name_length).unwrap();
        out.write_u32::<LittleEndian>(total_file_name_length).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap(); // file flags

        // compute where file data begins
        let folder_records_size = folder_count * 16;
        let file_records_size: u32 = self
            .folders
            .iter()
            .map(|(name, files)| (name.len() as u32 + 2) + files.len() as u32 * 16)
            .sum();
        let data_start = 36 + folder_records_size + file_records_size + total_file_name_length;

        // folder records
        let mut file_record_offset = 36 + folder_records_size + total_file_name_length;
        for (name, files) in &self.folders {
            out.write_u64::<LittleEndian>(tes4_hash(name)).unwrap();
            out.write_u32::<LittleEndian>(files.len() as u32).unwrap();
            out.write_u32::<LittleEndian>(file_record_offset).unwrap();
            file_record_offset += (name.len() as u32 + 2) + files.len() as u32 * 16;
        }

        // per-folder name + file records
        let mut data_offset = data_start;
        for (name, files) in &self.folders {
            out.write_u8(name.len() as u8 + 1).unwrap();
            out.write_all(name.as_bytes()).unwrap();
            out.write_u8(0).unwrap();

            for (file_name, data) in files {
                out.write_u64::<LittleEndian>(tes4_hash(file_name)).unwrap();
                out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
                out.write_u32::<LittleEndian>(data_offset).unwrap();
                data_offset += data.len() as u32;
            }
        }

        // file name block
        for files in self.folders.values() {
            for file_name in files.keys() {
                out.write_all(file_name.as_bytes()).unwrap();
                out.write_u8(0).unwrap();
            }
        }

        // file data
        for files in self.folders.values() {
            for data in files.values() {
                out.write_all(data).unwrap();
            }
        }

        out
    }
}

/// The classic TES4 name hash. Only used to fill the hash fields; the reader
/// resolves by name.
fn tes4_hash(name: &str) -> u64 {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return 0;
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&bytes[..idx], &bytes[idx..]),
        _ => (bytes, &b""[..]),
    };

    let mut hash1 = u64::from(stem[stem.len() - 1])
        | (u64::from(if stem.len() > 2 { stem[stem.len() - 2] } else { 0 }) << 8)
        | ((stem.len() as u64) << 16)
        | (u64::from(stem[0]) << 24);

    match ext {
        b".kf" => hash1 |= 0x80,
        b".nif" => hash1 |= 0x8000,
        b".dds" => hash1 |= 0x8080,
        b".wav" => hash1 |= 0x80000000,
        _ => {}
    }

    let mut hash2: u64 = 0;
    if stem.len() > 3 {
        for &byte in &stem[1..stem.len() - 2] {
            hash2 = hash2.wrapping_mul(0x1003f).wrapping_add(u64::from(byte));
        }
    }
    let mut hash3: u64 = 0;
    for &byte in ext {
        hash3 = hash3.wrapping_mul(0x1003f).wrapping_add(u64::from(byte));
    }

    ((hash2.wrapping_add(hash3)) & 0xffff_ffff) << 32 | (hash1 & 0xffff_ffff)
}
