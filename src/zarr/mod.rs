//! Zarr v2 store access.
//!
//! Arrays are read through the same [`StreamingFetcher`](crate::io::StreamingFetcher)
//! as every other source, so HTTP, local and S3 stores behave alike. Chunks
//! may be uncompressed, zlib or gzip; missing chunks read as the fill value.

mod array;
mod metadata;
mod reader;
mod selection;
mod store;

pub use array::{Region, ZarrArray};
pub use metadata::{ArrayMetadata, Compression, Dtype, ElementType};
pub use reader::{read_volume, volume_from_region};
pub use selection::SliceSelection;
pub use store::ZarrStore;
