//! Minimal TES4 plugin writer: a TES4 header record plus one TXST group,
//! which is all the patch plugin ever contains. Reading existing plugins is
//! the record store's concern, not this crate's.

pub mod types;
pub mod writer;


pub use types::{PluginDescriptor, TxstRecord};
pub use writer::EspWriter;
