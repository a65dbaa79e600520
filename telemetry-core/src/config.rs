//! Atomic dotted-key updates to a JSON config file (spec §4.7, `savecfg`).
//!
//! Writes go to a temp file in the same directory as the target and are
//! then renamed into place, so a crash mid-write never leaves a
//! half-written config file behind.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use serde_json::Value;

/// Read `path` (or start from an empty object if it doesn't exist yet),
/// apply each `"a.b.c": value` update, and atomically rewrite the file.
///
/// The new content is written to a temp file in the same directory,
/// `fsync`'d, then renamed over the target (spec §6 "Config persistence")
/// so a crash mid-write never leaves a half-written config file behind
/// and a crash mid-rename never clobbers the old file with an unflushed one.
pub fn update_config_file(path: &Path, updates: &[(&str, Value)]) -> io::Result<()> {
    let mut root: Value = match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::Object(Default::default())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Value::Object(Default::default()),
        Err(e) => return Err(e),
    };

    for (key_path, value) in updates {
        set_nested(&mut root, key_path, value.clone());
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("config")
    ));
    let write_result = write_and_fsync(&tmp_path, &serde_json::to_vec_pretty(&root)?);
    match write_result {
        Ok(()) => fs::rename(&tmp_path, path),
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

fn write_and_fsync(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn set_nested(root: &mut Value, key_path: &str, value: Value) {
    let parts: Vec<&str> = key_path.split('.').collect();
    let mut current = root;
    for part in &parts[..parts.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
        current = current
            .as_object_mut()
            .unwrap()
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    if !current.is_object() {
        *current = Value::Object(Default::default());
    }
    current
        .as_object_mut()
        .unwrap()
        .insert(parts[parts.len() - 1].to_string(), value);
}

/// Read a dotted key path back out of a JSON value, or `None` if any
/// segment along the way is missing.
pub fn get_nested<'a>(root: &'a Value, key_path: &str) -> Option<&'a Value> {
    let mut current = root;
    for part in key_path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}
