//! DDS container codec: header/metadata parsing (legacy and DX10 headers),
//! full decode to RGBA8 for the uncompressed and BC1/BC2/BC3 formats, and an
//! uncompressed RGBA8 writer for generated textures.

pub mod reader;
pub mod types;
pub mod writer;

#[cfg(test)]
mod tests;

pub use types::{AlphaMode, DdsFormat, DdsMetadata, DecodedImage};
