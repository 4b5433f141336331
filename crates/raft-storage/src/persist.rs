//! # persist
//!
//! why: small state files must never be observed half-written
//! relations: used by term_store.rs (term.state) and segmented_log.rs (commit.state)
//! what: atomic json write and tolerant json read

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// write `value` as json to `dir/name`
///
/// atomic write: write to temp file then rename
pub(crate) fn write_json_atomic<T: Serialize>(
    dir: &Path,
    name: &str,
    value: &T,
    fsync: bool,
) -> io::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let temp_path = dir.join(format!("{name}.tmp"));
    let mut file = File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    if fsync {
        file.sync_all()?;
    }
    fs::rename(&temp_path, dir.join(name))?;

    Ok(())
}

/// read json from `path`, `None` when the file doesn't exist
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let value = serde_json::from_str(&contents)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}
