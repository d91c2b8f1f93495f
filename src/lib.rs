//! Schema-validated configuration engine with hot reload.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod schema;
pub mod settings;

pub use config::ConfigEngine;
pub use error::{EngineError, EngineResult};
pub use lifecycle::Shutdown;
pub use schema::{SchemaNode, ValidationError};
pub use settings::EngineSettings;
