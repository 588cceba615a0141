use sessionjar_capture::{extract_token_details, extract_tokens};
use sessionjar_storage::{CaptureStore, EncryptionKey};
use std::path::PathBuf;

use super::{key_material, load_config, print_json};
use crate::KeyArgs;

pub fn run(
    key: KeyArgs,
    capture_file: Option<PathBuf>,
    headers: Vec<String>,
    details: bool,
) -> anyhow::Result<()> {
    let (paths, config) = load_config()?;
    let file = match capture_file {
        Some(path) => path,
        None => paths.resolve_capture_file(&config.capture.output_file),
    };
    let key = key_material(&key, &config)
        .as_deref()
        .map(EncryptionKey::parse)
        .transpose()?;

    let records = CaptureStore::new(file).with_key(key).load()?;
    let names = if headers.is_empty() {
        config.capture.header_allowlist.clone()
    } else {
        headers
    };

    if details {
        print_json(&extract_token_details(&records, &names))
    } else {
        print_json(&extract_tokens(&records, &names))
    }
}
