pub mod capture_store;
pub mod crypto;

pub use capture_store::CaptureStore;
pub use crypto::{decrypt_line, encrypt_line, EncryptionKey, ENCRYPTED_PREFIX};
