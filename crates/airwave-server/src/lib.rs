pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod queries;
pub mod server;

pub use config::AppConfig;
pub use error::ServerError;
pub use observability::init_tracing;
pub use queries::{QueryLayer, ResourceKey};
pub use server::{AirwaveServer, AppState, PrimaryStore, ServerBuilder, build_app};
