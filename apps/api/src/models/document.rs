use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A stored upload the pipeline can read. Produced by the upload store,
/// consumed read-only by extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentHandle {
    pub id: String,
    /// Original file name as uploaded; shown back to the caller.
    #[serde(rename = "filename")]
    pub display_name: String,
    #[serde(rename = "path")]
    pub locator: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl DocumentHandle {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        locator: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            locator: locator.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}
