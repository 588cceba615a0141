pub mod client;
pub mod discovery;
pub mod tabs;

pub use client::{CdpClient, CdpEvent, EventSource};
pub use discovery::{select_target, DevtoolsEndpoint, TargetInfo};
pub use tabs::{TabController, TabDriver, TabHandle};
