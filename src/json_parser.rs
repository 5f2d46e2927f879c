use crate::error::{RiftError, RiftResult};
use once_cell::sync::Lazy;
use serde_json::{self, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Parsed model descriptions keyed by path, so repeated runs in one process
/// (restart tests, parameter sweeps) read each file once.
static JSON_CACHE: Lazy<Mutex<HashMap<PathBuf, Value>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn cache() -> MutexGuard<'static, HashMap<PathBuf, Value>> {
    // a panic while holding the lock cannot leave a half-written entry
    JSON_CACHE.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct JsonParser;

impl JsonParser {
    pub fn load_json<P: AsRef<Path>>(file_path: P) -> RiftResult<Value> {
        let path_buf = file_path.as_ref().to_path_buf();

        if let Some(json) = cache().get(&path_buf) {
            return Ok(json.clone());
        }

        let json_str = fs::read_to_string(&path_buf).map_err(|e| {
            RiftError::config(format!("failed to read model file {}: {e}", path_buf.display()))
        })?;
        let json = Self::parse(&json_str)?;

        cache().insert(path_buf, json.clone());
        Ok(json)
    }

    pub fn parse(json_str: &str) -> RiftResult<Value> {
        serde_json::from_str(json_str).map_err(|e| RiftError::config(format!("failed to parse JSON: {e}")))
    }

}
