pub mod entry;
pub mod fm;
pub mod sa;
pub mod table;

#[cfg(test)]
pub(crate) mod testutil;

pub use entry::PackedIndexEntry;
pub use fm::{IndexMeta, PackedIndex, SaInterval};
pub use sa::{DecodeEndPos, SampledSa};
pub use table::{FmiTable, OffsetTableEntry, TableSpecs};
