use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use tokio::fs;

pub const MARKER_FILE: &str = "partial.json";

/// Marker kept inside a `_parts` directory recording how its segment files were cut.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialState {
    pub threads: u32,
}

impl PartialState {
    /// Reads the marker. A missing or unparsable marker yields `None`.
    pub async fn load(parts_dir: &Path) -> Option<Self> {
        let content = fs::read_to_string(parts_dir.join(MARKER_FILE)).await.ok()?;
        serde_json::from_str(&content).ok()
    }

    pub async fn store(&self, parts_dir: &Path) -> io::Result<()> {
        let content = serde_json::to_string(self)?;
        fs::write(parts_dir.join(MARKER_FILE), content).await
    }
}
