//! Flat JSON document persistence with write-temp-then-rename atomicity.
//!
//! Every small piece of process state (watermarks, session map, registered
//! groups, scheduled tasks) is a single JSON document under the data
//! directory, written by exactly one loop. Readers may observe a previous
//! snapshot but never a torn one.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use nanoclaw_types::NanoclawError;

/// Atomically persist a serializable value: write `<path>.tmp`, then rename.
pub fn atomic_save<T: Serialize>(path: &Path, value: &T) -> Result<(), NanoclawError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| NanoclawError::StoreError(format!("create dir failed: {e}")))?;
    }

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| NanoclawError::StoreError(format!("serialize failed: {e}")))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)
        .map_err(|e| NanoclawError::StoreError(format!("write tmp failed: {e}")))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| NanoclawError::StoreError(format!("rename failed: {e}")))?;

    Ok(())
}

/// Load a document, returning the type's default when the file is absent.
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, NanoclawError> {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map_err(|e| NanoclawError::StoreError(format!("parse {} failed: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(NanoclawError::StoreError(format!(
            "read {} failed: {e}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let mut map: HashMap<String, String> = HashMap::new();
        map.insert("main".into(), "sess-1".into());
        atomic_save(&path, &map).unwrap();

        let back: HashMap<String, String> = load_or_default(&path).unwrap();
        assert_eq!(back, map);
        // The temp file must not linger.
        assert!(!dir.path().join("sessions.json.tmp").exists());
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let map: HashMap<String, String> = load_or_default(&path).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        let result: Result<HashMap<String, String>, _> = load_or_default(&path);
        assert!(result.is_err());
    }

    #[test]
    fn save_creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/state.json");
        atomic_save(&path, &vec![1, 2, 3]).unwrap();
        let back: Vec<i32> = load_or_default(&path).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }
}
