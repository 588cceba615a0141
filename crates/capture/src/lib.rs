pub mod engine;
pub mod tokens;
pub mod tracker;

pub use engine::{capture_requests, CaptureRun};
pub use tokens::{audience_domain, extract_token_details, extract_tokens, TokenDetail};
pub use tracker::{RequestFilter, RequestState, RequestTracker};
