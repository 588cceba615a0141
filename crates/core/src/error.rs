use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The DevTools transport could not be opened or broke mid-session.
    #[error("Connection error: {0}")]
    Connection(String),

    /// No reachable debug endpoint, or no page targets on it.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// A command reply carried an `error` field.
    #[error("CDP command {method} failed: {message}")]
    ProtocolCommand { method: String, message: String },

    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Host binding, allowlist or denylist violation. Raised before any network call.
    #[error("Replay blocked: {0}")]
    Policy(String),

    #[error("No match: {0}")]
    NoMatch(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Remediation appended to transport and discovery failures.
pub const DEVTOOLS_HINT: &str =
    "Start the browser with --remote-debugging-port=<port> and --remote-allow-origins=*";
