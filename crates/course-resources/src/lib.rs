//! File-backed stores for auxiliary resources: GRIB weather grids and track logs.

pub mod grib;
pub mod id;
pub mod track;

use std::path::Path;

use serde_json::Value;
use thiserror::Error;
use tokio::fs;

pub use grib::GribStore;
pub use track::TrackStore;

/// Store failure with the HTTP status a route layer should answer with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({status})")]
pub struct ResourceError {
    pub status: u16,
    pub message: String,
}

impl ResourceError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: 400, message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: 404, message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self { status: 500, message: message.into() }
    }
}

pub(crate) async fn ensure_dir(path: &Path) -> Result<(), ResourceError> {
    fs::create_dir_all(path).await
        .map_err(|e| ResourceError::internal(format!("unable to create {}: {}", path.display(), e)))
}

/// File names in `dir`, newest-named first.
pub(crate) async fn list_files(dir: &Path) -> Result<Vec<String>, ResourceError> {
    let mut entries = fs::read_dir(dir).await
        .map_err(|e| ResourceError::internal(format!("error reading {}: {}", dir.display(), e)))?;
    let mut names = Vec::new();
    while let Ok(Some(ent)) = entries.next_entry().await {
        let is_file = ent.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Some(name) = ent.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort_by(|a, b| b.cmp(a));
    Ok(names)
}

pub(crate) async fn read_json(path: &Path) -> Result<Value, ResourceError> {
    let bytes = match fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ResourceError::not_found(format!("resource not found: {}", path.display())));
        }
        Err(e) => return Err(ResourceError::internal(format!("error reading {}: {}", path.display(), e))),
    };
    serde_json::from_slice(&bytes)
        .map_err(|e| ResourceError::bad_request(format!("invalid file contents {}: {}", path.display(), e)))
}

/// Picks the requested elements of an array document; out-of-range indices
/// are skipped. Non-array documents are returned whole.
pub(crate) fn select_sections(doc: Value, sections: Option<&[usize]>) -> Value {
    match (doc, sections) {
        (Value::Array(items), Some(idx)) => {
            Value::Array(idx.iter().filter_map(|&i| items.get(i).cloned()).collect())
        }
        (doc, _) => doc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sections_pick_existing_indices() {
        let doc = json!(["a", "b", "c"]);
        assert_eq!(select_sections(doc.clone(), Some(&[2, 0, 9][..])), json!(["c", "a"]));
        assert_eq!(select_sections(doc.clone(), None), doc);
        assert_eq!(select_sections(json!({"k": 1}), Some(&[0][..])), json!({"k": 1}));
    }

    #[tokio::test]
    async fn files_listed_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        for n in ["2024010100.json", "2024060100.json", "2023120100.json"] {
            tokio::fs::write(dir.path().join(n), b"[]").await.unwrap();
        }
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        let names = list_files(dir.path()).await.unwrap();
        assert_eq!(names, vec!["2024060100.json", "2024010100.json", "2023120100.json"]);
    }
}
