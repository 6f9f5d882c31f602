use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{ensure_dir, id, list_files, read_json, select_sections, ResourceError};

/// Header members copied into listing summaries.
const SUMMARY_FIELDS: [&str; 10] = [
    "parameterCategory",
    "parameterCategoryName",
    "parameterNumber",
    "parameterNumberName",
    "genProcessTypeName",
    "disciplineName",
    "gridDefinitionTemplate",
    "gridDefinitionTemplateName",
    "gribEdition",
    "refTime",
];

/// JSON-converted GRIB files, one file per forecast run, named by run time.
#[derive(Debug, Clone)]
pub struct GribStore {
    dir: PathBuf,
}

impl GribStore {
    pub async fn init(base: &Path) -> Result<Self, ResourceError> {
        let dir = base.join("grib");
        ensure_dir(&dir).await?;
        info!("resources: grib store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run key (first 10 characters of the file name) -> header summaries.
    /// Unreadable files are listed with empty contents.
    pub async fn list(&self) -> Result<Map<String, Value>, ResourceError> {
        let mut out = Map::new();
        for name in list_files(&self.dir).await? {
            let key: String = name.chars().take(10).collect();
            let contents: Vec<Value> = match read_json(&self.dir.join(&name)).await {
                Ok(Value::Array(records)) => records.iter().map(summarize).collect(),
                Ok(_) => {
                    warn!("resources: grib file {} is not a record array", name);
                    Vec::new()
                }
                Err(e) => {
                    warn!("resources: skipping grib file {}: {}", name, e);
                    Vec::new()
                }
            };
            out.insert(key, serde_json::json!({ "contents": contents }));
        }
        Ok(out)
    }

    pub async fn latest(&self) -> Result<Value, ResourceError> {
        let files = list_files(&self.dir).await?;
        let newest = files.first().ok_or_else(|| ResourceError::not_found("no grib resources"))?;
        read_json(&self.dir.join(newest)).await
    }

    pub async fn get(&self, run: &str, sections: Option<&[usize]>) -> Result<Value, ResourceError> {
        if !id::is_file_stem(run) {
            return Err(ResourceError::bad_request(format!("invalid grib id: {}", run)));
        }
        let doc = read_json(&self.dir.join(format!("{}.json", run))).await
            .map_err(|e| if e.status == 404 { ResourceError::not_found(format!("resource not found: {}", run)) } else { e })?;
        Ok(select_sections(doc, sections))
    }
}

fn summarize(record: &Value) -> Value {
    let header = record.get("header");
    let mut h = Map::new();
    for field in SUMMARY_FIELDS {
        let v = header.and_then(|hd| hd.get(field)).cloned().unwrap_or(Value::Null);
        h.insert(field.to_string(), v);
    }
    Value::Object(h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(cat: u32) -> Value {
        json!({"header": {"parameterCategory": cat, "refTime": "2024-05-01T00:00:00.000Z", "nx": 10}, "data": [1, 2, 3]})
    }

    async fn store_with_runs() -> (tempfile::TempDir, GribStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = GribStore::init(dir.path()).await.unwrap();
        let runs = [("2024050100.json", json!([record(2)])), ("2024050106.json", json!([record(0), record(1)]))];
        for (name, doc) in runs {
            tokio::fs::write(store.dir().join(name), serde_json::to_vec(&doc).unwrap()).await.unwrap();
        }
        tokio::fs::write(store.dir().join("2024043018.json"), b"not json").await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn list_summarizes_headers() {
        let (_dir, store) = store_with_runs().await;
        let listing = store.list().await.unwrap();
        assert_eq!(listing.len(), 3);
        let run = &listing["2024050106"]["contents"];
        assert_eq!(run.as_array().unwrap().len(), 2);
        assert_eq!(run[1]["parameterCategory"], 1);
        assert_eq!(run[1]["gribEdition"], Value::Null);
        assert!(run[1].get("nx").is_none());
        assert_eq!(listing["2024043018"]["contents"], json!([]));
    }

    #[tokio::test]
    async fn latest_is_newest_run() {
        let (_dir, store) = store_with_runs().await;
        let doc = store.latest().await.unwrap();
        assert_eq!(doc.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn get_with_sections_and_errors() {
        let (_dir, store) = store_with_runs().await;
        let doc = store.get("2024050106", Some(&[1][..])).await.unwrap();
        assert_eq!(doc[0]["header"]["parameterCategory"], 1);
        assert_eq!(store.get("2099010100", None).await.unwrap_err().status, 404);
        assert_eq!(store.get("../../etc/passwd", None).await.unwrap_err().status, 400);
        assert_eq!(store.get("2024043018", None).await.unwrap_err().status, 400);
    }

    #[tokio::test]
    async fn empty_store_has_no_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = GribStore::init(dir.path()).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(store.latest().await.unwrap_err().status, 404);
    }
}
