//! Declarative schema for configuration trees.
//!
//! # Data Flow
//! ```text
//! candidate tree
//!     → defaults.rs (fill absent values, idempotent)
//!     → validation.rs (collect every violation)
//!     → Vec<ValidationError> (empty = valid)
//! ```
//!
//! # Design Decisions
//! - Validation is a pure function: (&Value, &SchemaNode) → Vec<ValidationError>
//! - Unknown keys are allowed; only declared properties are checked
//! - Defaults never overwrite present values

pub mod defaults;
pub mod node;
pub mod validation;

pub use defaults::apply_defaults;
pub use node::{Predicate, SchemaNode, ValueKind};
pub use validation::{validate, ValidationError};
