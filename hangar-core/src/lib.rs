pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod model;

pub use config::Config;
pub use error::HangarError;
pub use health::{HealthSnapshot, HealthState};
pub use logging::{FunctionLog, LogLevel, LoggerProvider, NullLogger, NullLoggerProvider};
pub use model::{
    CronSpec, DeploymentMetadata, FunctionPackage, RouteMethod, RouteSpec, SourceKind,
};
