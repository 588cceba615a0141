use sessionjar_core::{CapturedRequest, Error, Result};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::crypto::{decrypt_line, encrypt_line, is_encrypted, EncryptionKey};

/// Append-only JSONL file of captured requests, one record per line.
///
/// With a key, every written line is encrypted; plain and encrypted lines
/// may coexist in one file.
pub struct CaptureStore {
    path: PathBuf,
    key: Option<EncryptionKey>,
}

impl CaptureStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: Option<EncryptionKey>) -> Self {
        self.key = key;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_encrypting(&self) -> bool {
        self.key.is_some()
    }

    /// Append records, creating the file and its parent directories as needed.
    pub fn append(&self, records: &[CapturedRequest]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        for record in records {
            let mut line = serde_json::to_string(record)?;
            if let Some(key) = &self.key {
                line = encrypt_line(&line, key)?;
            }
            writeln!(file, "{}", line)?;
        }

        debug!(
            path = %self.path.display(),
            count = records.len(),
            encrypted = self.key.is_some(),
            "Appended captures"
        );
        Ok(())
    }

    /// Load every record, in file order. Blank lines are skipped.
    pub fn load(&self) -> Result<Vec<CapturedRequest>> {
        if !self.path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Capture file not found: {}", self.path.display()),
            )));
        }

        let file = std::fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let json = if is_encrypted(line) {
                let key = self.key.as_ref().ok_or_else(|| {
                    Error::Encryption(
                        "Capture file is encrypted. Provide a key via --encryption-key or the key environment variable."
                            .into(),
                    )
                })?;
                decrypt_line(line, key)?
            } else {
                line.to_string()
            };
            records.push(serde_json::from_str::<CapturedRequest>(&json)?);
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use tempfile::TempDir;

    fn record(id: &str, url: &str) -> CapturedRequest {
        let mut headers = IndexMap::new();
        headers.insert("Cookie".to_string(), format!("session={}", id));
        CapturedRequest::new(id, "GET", url, headers)
    }

    #[test]
    fn test_append_and_load_plain() {
        let dir = TempDir::new().unwrap();
        let store = CaptureStore::new(dir.path().join("nested/caps.jsonl"));
        store.append(&[record("1", "https://a.io/x")]).unwrap();
        store.append(&[record("2", "https://b.io/y")]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].request_id, "1");
        assert_eq!(loaded[1].header("cookie"), Some("session=2"));
    }

    #[test]
    fn test_encrypted_file_requires_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("caps.jsonl");
        let key = EncryptionKey::generate();

        CaptureStore::new(&path)
            .with_key(Some(key.clone()))
            .append(&[record("1", "https://a.io/x")])
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("ENC:"));
        assert!(!raw.contains("session=1"));

        let err = CaptureStore::new(&path).load().unwrap_err();
        assert!(matches!(err, Error::Encryption(_)));

        let err = CaptureStore::new(&path)
            .with_key(Some(EncryptionKey::generate()))
            .load()
            .unwrap_err();
        assert!(matches!(err, Error::Encryption(_)));

        let loaded = CaptureStore::new(&path).with_key(Some(key)).load().unwrap();
        assert_eq!(loaded[0].url, "https://a.io/x");
    }

    #[test]
    fn test_encrypted_roundtrip_keeps_header_bytes_and_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("caps.jsonl");
        let key = EncryptionKey::generate();

        let mut headers = IndexMap::new();
        headers.insert("X-CSRF-Token".to_string(), "tok\"quoted\"".to_string());
        headers.insert("cookie".to_string(), "sid=abc; lang=fr-FR; nom=Zoë".to_string());
        headers.insert("Authorization".to_string(), "Bearer ünï≈code".to_string());
        headers.insert("accept".to_string(), "application/json\ntext/plain".to_string());
        let original = CapturedRequest::new("42", "POST", "https://api.a.io/v1?q=1", headers);

        let store = CaptureStore::new(&path).with_key(Some(key));
        assert!(store.is_encrypting());
        store.append(std::slice::from_ref(&original)).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].headers, original.headers);
        let names: Vec<_> = loaded[0].headers.keys().cloned().collect();
        assert_eq!(
            names,
            vec!["X-CSRF-Token", "cookie", "Authorization", "accept"]
        );
        assert_eq!(loaded[0].method, original.method);
        assert_eq!(loaded[0].url, original.url);
    }

    #[test]
    fn test_mixed_plain_and_encrypted_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("caps.jsonl");
        let key = EncryptionKey::generate();

        CaptureStore::new(&path)
            .append(&[record("plain", "https://a.io/")])
            .unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"\n")
            .unwrap();
        CaptureStore::new(&path)
            .with_key(Some(key.clone()))
            .append(&[record("sealed", "https://b.io/")])
            .unwrap();

        let loaded = CaptureStore::new(&path).with_key(Some(key)).load().unwrap();
        let ids: Vec<_> = loaded.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["plain", "sealed"]);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let err = CaptureStore::new(dir.path().join("nope.jsonl"))
            .load()
            .unwrap_err();
        assert!(err.to_string().contains("Capture file not found"));
    }
}
