pub mod engine;
pub mod policy;
pub mod redact;
pub mod select;

pub use engine::{replay_with_capture, ReplayBody, ReplayOutcome};
pub use policy::ReplayPolicy;
pub use redact::{redact_headers, REDACTED, SENSITIVE_HEADERS};
pub use select::{sanitize_headers, select_capture};
