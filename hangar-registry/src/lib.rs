pub mod handler;
pub mod loader;
pub mod parse;
pub mod registry;
pub mod routes;

pub use handler::{ClosureHandler, Handler, HandlerFuture, InvocationContext};
pub use loader::{DylibLoader, Loader, LoaderError, TestLoader};
pub use parse::normalise_cron_expression;
pub use registry::{LoadedHandler, Registry, RegistrySnapshot};
