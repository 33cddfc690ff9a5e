use std::fs;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use thiserror::Error;

const BSA_MAGIC: u32 = u32::from_le_bytes(*b"BSA\0");

const FLAG_INCLUDE_DIR_NAMES: u32 = 0x1;
const FLAG_INCLUDE_FILE_NAMES: u32 = 0x2;
const FLAG_COMPRESSED: u32 = 0x4;
const FLAG_EMBED_FILE_NAMES: u32 = 0x100;

/// The size field's high bit toggles the archive-default compression for a
/// single file.
const SIZE_COMPRESSION_TOGGLE: u32 = 1 << 30;
const SIZE_MASK: u32 = !(SIZE_COMPRESSION_TOGGLE | (1 << 31));

#[derive(Error, Debug)]
pub enum BsaError {
    #[error("Not a BSA archive (magic {magic:#x})")]
    InvalidMagic { magic: u32 },

    #[error("Unsupported BSA version {version}")]
    UnsupportedVersion { version: u32 },

    #[error("Archive does not embed file names")]
    MissingFileNames,

    #[error("File not found in archive: {name}")]
    FileNotFound { name: String },

    #[error("LZ4-compressed entries are not supported: {name}")]
    Lz4Unsupported { name: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Full internal path, backslash separated, lowercased as stored.
    pub name: String,
    pub offset: u64,
    pub size: u32,
    pub compressed: bool,
}

/// A read-only view of a BSA. The whole archive is loaded into memory on
/// open; archives the pipeline touches are bounded by install size and the
/// random access pattern makes streaming a poor trade.
pub struct Archive {
    path: PathBuf,
    version: u32,
    flags: u32,
    data: Vec<u8>,
    entries: Vec<FileEntry>,
}

impl Archive {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Archive, BsaError> {
        let data = fs::read(path.as_ref())?;
        Self::from_bytes(path.as_ref().to_path_buf(), data)
    }

    pub fn from_bytes(path: PathBuf, data: Vec<u8>) -> Result<Archive, BsaError> {
        let mut rdr = Cursor::new(data.as_slice());

        let magic = rdr.read_u32::<LittleEndian>()?;
        if magic != BSA_MAGIC {
            return Err(BsaError::InvalidMagic { magic });
        }

        let version = rdr.read_u32::<LittleEndian>()?;
        if version != 104 && version != 105 {
            return Err(BsaError::UnsupportedVersion { version });
        }

        let _offset = rdr.read_u32::<LittleEndian>()?;
        let flags = rdr.read_u32::<LittleEndian>()?;
        let folder_count = rdr.read_u32::<LittleEndian>()? as usize;
        let file_count = rdr.read_u32::<LittleEndian>()? as usize;
        let _total_folder_name_length = rdr.read_u32::<LittleEndian>()?;
        let _total_file_name_length = rdr.read_u32::<LittleEndian>()?;
        let _file_flags = rdr.read_u32::<LittleEndian>()?;

        if flags & FLAG_INCLUDE_DIR_NAMES == 0 || flags & FLAG_INCLUDE_FILE_NAMES == 0 {
            return Err(BsaError::MissingFileNames);
        }

        // folder records
        struct FolderRecord {
            count: usize,
        }
        let mut folders = Vec::with_capacity(folder_count);
        for _ in 0..folder_count {
            let _hash = rdr.read_u64::<LittleEndian>()?;
            let count = rdr.read_u32::<LittleEndian>()? as usize;
            if version == 105 {
                let _padding = rdr.read_u32::<LittleEndian>()?;
                let _offset = rdr.read_u64::<LittleEndian>()?;
            } else {
                let _offset = rdr.read_u32::<LittleEndian>()?;
            }
            folders.push(FolderRecord { count });
        }

        // per-folder: folder name + file records
        struct RawFile {
            folder: usize,
            size: u32,
            offset: u64,
        }
        let mut folder_names = Vec::with_capacity(folder_count);
        let mut raw_files = Vec::with_capacity(file_count);
        for (folder_idx, folder) in folders.iter().enumerate() {
            // bzstring: u8 length including the null terminator
            let name_len = rdr.read_u8()? as usize;
            let mut name_buf = vec![0u8; name_len];
            rdr.read_exact(&mut name_buf)?;
            if name_buf.last() == Some(&0) {
                name_buf.pop();
            }
            folder_names.push(String::from_utf8_lossy(&name_buf).into_owned());

            for _ in 0..folder.count {
                let _hash = rdr.read_u64::<LittleEndian>()?;
                let size = rdr.read_u32::<LittleEndian>()?;
                let offset = rdr.read_u32::<LittleEndian>()? as u64;
                raw_files.push(RawFile {
                    folder: folder_idx,
                    size,
                    offset,
                });
            }
        }

        // file name block: zstrings in file record order
        let mut file_names = Vec::with_capacity(file_count);
        let mut current = Vec::new();
        while file_names.len() < file_count {
            let byte = rdr.read_u8()?;
            if byte == 0 {
                file_names.push(String::from_utf8_lossy(&current).into_owned());
                current.clear();
            } else {
                current.push(byte);
            }
        }

        let default_compressed = flags & FLAG_COMPRESSED != 0;
        let mut entries = Vec::with_capacity(file_count);
        for (raw, file_name) in raw_files.iter().zip(file_names) {
            let toggled = raw.size & SIZE_COMPRESSION_TOGGLE != 0;
            let compressed = default_compressed != toggled;
            let folder = &folder_names[raw.folder];
            let name = if folder.is_empty() {
                file_name
            } else {
                format!("{folder}\\{file_name}")
            };

            entries.push(FileEntry {
                name,
                offset: raw.offset,
                size: raw.size & SIZE_MASK,
                compressed,
            });
        }

        Ok(Archive {
            path,
            version,
            flags,
            data,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn find(&self, name: &str) -> Option<&FileEntry> {
        self.entries.iter().find(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Extracts one file into an owned buffer, inflating zlib entries.
    pub fn read_file(&self, entry: &FileEntry) -> Result<Vec<u8>, BsaError> {
        let mut rdr = Cursor::new(self.data.as_slice());
        rdr.seek(SeekFrom::Start(entry.offset))?;

        let mut remaining = entry.size as usize;
        if self.flags & FLAG_EMBED_FILE_NAMES != 0 {
            // bstring full path prefixed to the data
            let name_len = rdr.read_u8()? as usize;
            rdr.seek(SeekFrom::Current(name_len as i64))?;
            remaining = remaining.saturating_sub(name_len + 1);
        }

        if !entry.compressed {
            let mut buf = vec![0u8; remaining];
            rdr.read_exact(&mut buf)?;
            return Ok(buf);
        }

        let original_size = rdr.read_u32::<LittleEndian>()? as usize;
        remaining = remaining.saturating_sub(4);

        if self.version == 105 {
            // SSE archives compress with LZ4; out of scope for this reader
            return Err(BsaError::Lz4Unsupported {
                name: entry.name.clone(),
            });
        }

        let mut compressed = vec![0u8; remaining];
        rdr.read_exact(&mut compressed)?;

        let mut decoder = ZlibDecoder::new(compressed.as_slice());
        let mut buf = Vec::with_capacity(original_size);
        decoder.read_to_end(&mut buf)?;
        Ok(buf)
    }
}
