use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::fs;
use tracing::{info, warn};

use crate::{ensure_dir, id, list_files, read_json, select_sections, ResourceError};

/// Recorded tracks, one JSON file per track, keyed by resource id.
#[derive(Debug, Clone)]
pub struct TrackStore {
    dir: PathBuf,
    source: String,
}

impl TrackStore {
    /// `source` is stamped into listings as `$source`.
    pub async fn init(base: &Path, source: impl Into<String>) -> Result<Self, ResourceError> {
        let dir = base.join("tracks");
        ensure_dir(&dir).await?;
        info!("resources: track store at {}", dir.display());
        Ok(Self { dir, source: source.into() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resource id -> track, each stamped with file mtime and `$source`.
    pub async fn list(&self) -> Result<Map<String, Value>, ResourceError> {
        let mut out = Map::new();
        for name in list_files(&self.dir).await? {
            let path = self.dir.join(&name);
            let mut track = match read_json(&path).await {
                Ok(Value::Object(obj)) => obj,
                Ok(_) => {
                    warn!("resources: track file {} is not an object", name);
                    continue;
                }
                Err(e) => {
                    warn!("resources: skipping track file {}: {}", name, e);
                    continue;
                }
            };
            if let Some(ts) = modified(&path).await {
                track.insert("timestamp".into(), Value::String(ts));
            }
            track.insert("$source".into(), Value::String(self.source.clone()));
            out.insert(id::to_resource_id(&name), Value::Object(track));
        }
        Ok(out)
    }

    pub async fn get(&self, resource_id: &str, sections: Option<&[usize]>) -> Result<Value, ResourceError> {
        let path = self.path_for(resource_id)?;
        let doc = read_json(&path).await
            .map_err(|e| if e.status == 404 { ResourceError::not_found(format!("track not found: {}", resource_id)) } else { e })?;
        Ok(select_sections(doc, sections))
    }

    /// `Some` writes (add or replace), `None` deletes.
    pub async fn set(&self, resource_id: &str, value: Option<Value>) -> Result<(), ResourceError> {
        let path = self.path_for(resource_id)?;
        match value {
            None => {
                fs::remove_file(&path).await
                    .map_err(|e| ResourceError::not_found(format!("error deleting {}: {}", resource_id, e)))?;
                info!("resources: deleted track {}", resource_id);
            }
            Some(track) => {
                if !is_valid_track(&track) {
                    return Err(ResourceError::bad_request("invalid track data"));
                }
                let body = serde_json::to_vec(&track)
                    .map_err(|e| ResourceError::internal(format!("encoding track: {}", e)))?;
                fs::write(&path, body).await
                    .map_err(|e| ResourceError::internal(format!("error writing {}: {}", resource_id, e)))?;
                info!("resources: stored track {}", resource_id);
            }
        }
        Ok(())
    }

    fn path_for(&self, resource_id: &str) -> Result<PathBuf, ResourceError> {
        let name = id::file_name(resource_id)
            .ok_or_else(|| ResourceError::bad_request(format!("invalid resource id: {}", resource_id)))?;
        Ok(self.dir.join(name))
    }
}

fn is_valid_track(track: &Value) -> bool {
    track.get("feature").map_or(false, |f| !f.is_null())
}

async fn modified(path: &Path) -> Option<String> {
    let mtime = fs::metadata(path).await.ok()?.modified().ok()?;
    OffsetDateTime::from(mtime).format(&Rfc3339).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ID: &str = "urn:mrn:signalk:uuid:36f2c7c1-9a0b-4f6e-8d2a-0c1b2d3e4f50";

    fn track() -> Value {
        json!({"feature": {"type": "Feature", "geometry": {"type": "MultiLineString", "coordinates": [[[0, 0], [1, 1]]]}}})
    }

    #[tokio::test]
    async fn write_list_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackStore::init(dir.path(), "freeboard-sk-helper").await.unwrap();

        store.set(ID, Some(track())).await.unwrap();
        let listing = store.list().await.unwrap();
        let entry = &listing[ID];
        assert_eq!(entry["$source"], "freeboard-sk-helper");
        assert!(entry["timestamp"].is_string());
        assert_eq!(entry["feature"]["type"], "Feature");

        assert_eq!(store.get(ID, None).await.unwrap(), track());

        store.set(ID, None).await.unwrap();
        assert_eq!(store.get(ID, None).await.unwrap_err().status, 404);
        assert_eq!(store.set(ID, None).await.unwrap_err().status, 404);
    }

    #[tokio::test]
    async fn ids_are_checked_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackStore::init(dir.path(), "x").await.unwrap();
        let err = store.set("urn:mrn:signalk:uuid:../../escape", Some(track())).await.unwrap_err();
        assert_eq!(err.status, 400);
        assert_eq!(store.get("not-an-id", None).await.unwrap_err().status, 400);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn track_without_feature_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackStore::init(dir.path(), "x").await.unwrap();
        let err = store.set(ID, Some(json!({"name": "no geometry"}))).await.unwrap_err();
        assert_eq!(err, ResourceError::bad_request("invalid track data"));
    }
}
