use serde_json::json;
use sessionjar_core::config::DEFAULT_KEY_ENV;
use sessionjar_storage::EncryptionKey;

use super::print_json;

pub fn run() -> anyhow::Result<()> {
    let key = EncryptionKey::generate();
    print_json(&json!({
        "key": key.to_base64(),
        "usage": format!("export {}=<key> or pass --encryption-key <key>", DEFAULT_KEY_ENV),
    }))
}
