//! Filesystem backend: one directory per table, one JSON file per key.
//!
//! File names are the key with every byte outside `[A-Za-z0-9_.-]` written
//! as `%XX`. An encoded name longer than [`MAX_NAME_LEN`] is replaced by `~`
//! and the BLAKE3 hex of the key, and the file then holds `{key, value}` so
//! scans can still recover the key. Replacing writes go through a temp file
//! and `rename`; creating writes hard-link the temp file into place, which
//! fails atomically when the target exists.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use uuid::Uuid;

use crate::backend::{BackendType, KvBackend};
use crate::error::{KvError, KvResult};

const TMP_DIR: &str = ".tmp";
/// Well under the 255-byte file name limit of common filesystems.
const MAX_NAME_LEN: usize = 200;
const HASHED_PREFIX: char = '~';

/// File content for keys stored under a hashed name.
#[derive(Serialize, Deserialize)]
struct HashedEntry {
    key: String,
    value: Value,
}

/// On-disk name of a key, and whether it is hashed.
fn file_name(key: &str) -> (String, bool) {
    let encoded = encode_name(key);
    if encoded.len() <= MAX_NAME_LEN {
        return (encoded, false);
    }
    (format!("{HASHED_PREFIX}{}", blake3::hash(key.as_bytes()).to_hex()), true)
}

fn file_contents(key: &str, value: Value, hashed: bool) -> KvResult<Vec<u8>> {
    let bytes = if hashed {
        serde_json::to_vec(&HashedEntry {
            key: key.to_string(),
            value,
        })?
    } else {
        serde_json::to_vec(&value)?
    };
    Ok(bytes)
}

pub struct FilesystemKv {
    root: PathBuf,
}

impl FilesystemKv {
    pub async fn open(root: impl AsRef<Path>) -> KvResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(TMP_DIR))
            .await
            .map_err(|e| KvError::Unavailable(format!("cannot prepare data directory: {}", e.kind())))?;
        Ok(Self { root })
    }

    fn table_dir(&self, table: &str) -> PathBuf {
        self.root.join(encode_name(table))
    }

    async fn stage(&self, bytes: Vec<u8>) -> KvResult<PathBuf> {
        let tmp = self.root.join(TMP_DIR).join(Uuid::new_v4().to_string());
        if let Err(e) = fs::write(&tmp, bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(io_error(e));
        }
        Ok(tmp)
    }

    /// Target path and staged temp file for writing `value` under `key`.
    async fn prepare(&self, table: &str, key: &str, value: Value) -> KvResult<(PathBuf, PathBuf)> {
        let dir = self.table_dir(table);
        fs::create_dir_all(&dir).await.map_err(io_error)?;
        let (name, hashed) = file_name(key);
        let tmp = self.stage(file_contents(key, value, hashed)?).await?;
        Ok((dir.join(name), tmp))
    }
}

fn io_error(err: std::io::Error) -> KvError {
    KvError::Unavailable(format!("filesystem backend i/o failure: {}", err.kind()))
}

fn encode_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_name(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[async_trait]
impl KvBackend for FilesystemKv {
    fn backend_type(&self) -> BackendType {
        BackendType::Filesystem
    }

    async fn get(&self, table: &str, key: &str) -> KvResult<Option<Value>> {
        let (name, hashed) = file_name(key);
        let bytes = match fs::read(self.table_dir(table).join(name)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(e)),
        };
        if !hashed {
            return Ok(Some(serde_json::from_slice(&bytes)?));
        }
        let entry: HashedEntry = serde_json::from_slice(&bytes)?;
        Ok((entry.key == key).then_some(entry.value))
    }

    async fn put(&self, table: &str, key: &str, value: Value) -> KvResult<()> {
        let (target, tmp) = self.prepare(table, key, value).await?;
        if let Err(e) = fs::rename(&tmp, target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(io_error(e));
        }
        Ok(())
    }

    async fn put_if_absent(&self, table: &str, key: &str, value: Value) -> KvResult<bool> {
        let (target, tmp) = self.prepare(table, key, value).await?;
        let linked = fs::hard_link(&tmp, target).await;
        // The staged file is only a link source; losing it is harmless.
        let _ = fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(io_error(e)),
        }
    }

    async fn scan_prefix(&self, table: &str, prefix: &str) -> KvResult<Vec<(String, Value)>> {
        let mut dir = match fs::read_dir(self.table_dir(table)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(e)),
        };

        let mut matches = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(io_error)? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with(HASHED_PREFIX) {
                let bytes = fs::read(entry.path()).await.map_err(io_error)?;
                let hashed: HashedEntry = serde_json::from_slice(&bytes)?;
                if hashed.key.starts_with(prefix) {
                    matches.push((hashed.key, hashed.value));
                }
                continue;
            }
            let Some(key) = decode_name(name) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            let bytes = fs::read(entry.path()).await.map_err(io_error)?;
            matches.push((key, serde_json::from_slice(&bytes)?));
        }
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_round_trip() {
        let key = "t_demo#saas#dev#head#c1";
        let encoded = encode_name(key);
        assert!(!encoded.contains('#'));
        assert_eq!(decode_name(&encoded).as_deref(), Some(key));
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let kv = FilesystemKv::open(dir.path()).await.unwrap();
            kv.put("routes", "a#1", json!({"v": 1})).await.unwrap();
        }
        let kv = FilesystemKv::open(dir.path()).await.unwrap();
        assert_eq!(kv.get("routes", "a#1").await.unwrap(), Some(json!({"v": 1})));
        assert_eq!(kv.get("routes", "a#2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn create_is_exclusive_and_scan_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FilesystemKv::open(dir.path()).await.unwrap();

        assert!(kv.put_if_absent("cmd", "c#rev#0000000002", json!(2)).await.unwrap());
        assert!(kv.put_if_absent("cmd", "c#rev#0000000001", json!(1)).await.unwrap());
        assert!(!kv.put_if_absent("cmd", "c#rev#0000000001", json!(9)).await.unwrap());

        let scanned = kv.scan_prefix("cmd", "c#rev#").await.unwrap();
        assert_eq!(
            scanned,
            vec![
                ("c#rev#0000000001".to_string(), json!(1)),
                ("c#rev#0000000002".to_string(), json!(2)),
            ]
        );
    }

    #[tokio::test]
    async fn long_keys_use_hashed_names() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FilesystemKv::open(dir.path()).await.unwrap();
        let key = format!("t_demo#saas#dev#p1#idem#c1#{}", "k€y".repeat(80));
        assert!(encode_name(&key).len() > MAX_NAME_LEN);

        assert!(kv.put_if_absent("canvas", &key, json!({"rev": 1})).await.unwrap());
        assert!(!kv.put_if_absent("canvas", &key, json!({"rev": 2})).await.unwrap());
        kv.put("canvas", "t_demo#saas#dev#p1#idem#c1#short", json!(0)).await.unwrap();
        assert_eq!(kv.get("canvas", &key).await.unwrap(), Some(json!({"rev": 1})));

        let scanned = kv.scan_prefix("canvas", "t_demo#saas#dev#p1#idem#c1#").await.unwrap();
        assert_eq!(scanned.len(), 2);
        assert!(scanned.contains(&(key.clone(), json!({"rev": 1}))));

        let mut names = std::fs::read_dir(dir.path().join("canvas")).unwrap();
        assert!(names.all(|n| n.unwrap().file_name().len() <= MAX_NAME_LEN));
    }

    #[tokio::test]
    async fn failed_rename_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FilesystemKv::open(dir.path()).await.unwrap();
        // A directory in place of the key file makes the rename fail.
        std::fs::create_dir_all(dir.path().join("routes").join("blocked").join("child")).unwrap();

        assert!(kv.put("routes", "blocked", json!(1)).await.is_err());
        assert_eq!(std::fs::read_dir(dir.path().join(TMP_DIR)).unwrap().count(), 0);
    }
}
