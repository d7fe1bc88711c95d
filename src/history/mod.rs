pub mod manifest;

pub use manifest::{LayerRecord, YearManifest, MANIFEST_FILE};
