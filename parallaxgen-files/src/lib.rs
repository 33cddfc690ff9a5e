use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("The file's magic value does not match the expectation {magic}")]
    InvalidMagicValue { magic: u32 },

    #[error("The file is violating the expected format, because: {reason}")]
    FormatError { reason: &'static str },

    /// Represents an empty source. For example, a zero-byte NIF handed to
    /// `NifFile::parse()`.
    #[error("Source contains no data")]
    EmptySource,

    /// NIF texture slots are constrained to the lower ASCII range; anything
    /// else poisons downstream path canonicalization and must be rejected at
    /// read time.
    #[error("Texture slot contains non-ASCII characters: {slot}")]
    NonAsciiTextureSlot { slot: String },

    /// A shader block advertises a texture set that is not present in the
    /// block list.
    #[error("Dangling block reference {reference} from block {block}")]
    DanglingBlockRef { block: usize, reference: u32 },

    /// Represents all other cases of `std::io::Error`.
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UTF8ConversationError(#[from] std::string::FromUtf8Error),
}

pub mod common;
pub mod dds;
pub mod esp;
pub mod nif;
