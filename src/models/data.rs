//! Backing data items shown alongside assignment forms.

use std::collections::BTreeMap;

use serde::Serialize;

/// One backing item users respond about.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Datum {
    pub id: String,
    pub assignment_id: String,
    pub url: String,
    pub metadata: BTreeMap<String, String>,
}

impl Datum {
    /// Metadata keys in stable order, used as extra CSV columns.
    pub fn metadata_keys(&self) -> Vec<String> {
        self.metadata.keys().cloned().collect()
    }
}
