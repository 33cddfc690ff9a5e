//! Subset codec for Gamebryo/NetImmerse mesh files as shipped by the
//! Skyrim-family games (version 20.2.0.7, BS stream 100).
//!
//! Only the blocks the patch pipeline mutates are decoded into structured
//! form; every other block is carried verbatim through the header's
//! block-size table, so a file round-trips byte-identically when nothing is
//! changed.

pub mod reader;
pub mod types;
pub mod writer;

#[cfg(test)]
mod tests;

pub use types::{
    Block, EffectShaderProperty, LightingShaderProperty, LightingShaderType, NifBlock, NifFile, ShaderFlags1,
    ShaderFlags2, ShaderTextureSet, TextureSlot, TriShape, NIF_NONE_REF, NUM_TEXTURE_SLOTS,
};
