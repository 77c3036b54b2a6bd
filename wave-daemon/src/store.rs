//! File-backed key-value store: flat `key=value` lines, write-through.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;
use wave_core::KvStore;

/// Durable store for the engine's relationship and block state. Keys must
/// not contain `=` or newlines; values must not contain newlines (the
/// engine's keys and label values satisfy both).
pub struct FileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStore {
    /// Open (or create) the store at `path`, loading existing entries.
    /// Unparseable lines are skipped with a warning.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut entries = BTreeMap::new();
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                for line in contents.lines() {
                    if line.is_empty() {
                        continue;
                    }
                    match line.split_once('=') {
                        Some((k, v)) => {
                            entries.insert(k.to_string(), v.to_string());
                        }
                        None => warn!(path = %path.display(), line, "skipping malformed store line"),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    // Write-through: rewrite the whole file on every mutation. The state is
    // tiny (tens of records); a failed write is logged and retried by the
    // next mutation.
    fn flush(&self) {
        let mut out = String::new();
        for (k, v) in &self.entries {
            out.push_str(k);
            out.push('=');
            out.push_str(v);
            out.push('\n');
        }
        let tmp = self.path.with_extension("kv.tmp");
        let result = std::fs::File::create(&tmp)
            .and_then(|mut f| f.write_all(out.as_bytes()))
            .and_then(|_| std::fs::rename(&tmp, &self.path));
        if let Err(e) = result {
            warn!(path = %self.path.display(), %e, "failed to persist store");
        }
    }
}

impl KvStore for FileStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set_string(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
        self.flush();
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        self.entries.get(key)?.parse().ok()
    }

    fn set_int(&mut self, key: &str, value: i64) {
        self.entries.insert(key.to_string(), value.to_string());
        self.flush();
    }

    fn erase(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.flush();
        }
    }
}
