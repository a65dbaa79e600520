//! Process single-instance lock (spec §6 "Process-lock").
//!
//! A lock file under a well-known temp path is created with
//! `create_new` semantics — it fails if the file already exists — and
//! held open for the life of the process, so a second instance of the
//! same service can't start against the same radio/config. Dropping the
//! guard removes the file, releasing the lock on clean shutdown; an
//! unclean exit (process killed) leaves the file behind, and a stale
//! lock must be removed by hand before restarting.

use std::fs::{self, File};
use std::io;
use std::path::PathBuf;

pub struct SingleInstanceLock {
    path: PathBuf,
    _file: File,
}

impl SingleInstanceLock {
    /// Acquires the lock for `name` (e.g. `"gateway-service"`) under the
    /// system temp directory. Fails with `io::ErrorKind::AlreadyExists`
    /// if another instance already holds it.
    pub fn acquire(name: &str) -> io::Result<Self> {
        let path = std::env::temp_dir().join(format!("{name}.lock"));
        let file = fs::OpenOptions::new().write(true).create_new(true).open(&path)?;
        Ok(Self { path, _file: file })
    }
}

impl Drop for SingleInstanceLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let name = format!("telemetry-core-lock-test-{}", std::process::id());
        let first = SingleInstanceLock::acquire(&name).unwrap();
        let second = SingleInstanceLock::acquire(&name);
        assert!(second.is_err());
        drop(first);
        SingleInstanceLock::acquire(&name).unwrap();
    }
}
