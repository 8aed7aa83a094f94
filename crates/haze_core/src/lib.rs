pub mod config;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod response;
pub mod server;

pub use config::{ConfigFile, HazeConfig, ProxySetup};
pub use error::{ConfigError, LifecycleError, ProxyError};
pub use pipeline::{Outcome, RequestPipeline};
pub use registry::InstanceRegistry;
