pub mod config;
pub mod error;
pub mod paths;
pub mod recipe;
pub mod types;

pub use config::{
    CaptureConfig, Config, RefreshTrigger, ReplayConfig, StorageConfig, TabControllerConfig,
};
pub use error::{Error, Result};
pub use paths::Paths;
pub use recipe::Recipe;
pub use types::{CapturedRequest, HeaderMap};
