//! Turns one logical statement into per-unit SQL.
//!
//! Generators emit [`SqlToken`]s against the original text; each unit's
//! tokens are spliced in descending position order and its parameter list
//! is rebuilt from the same route information.

pub mod context;
pub mod engine;
pub mod generator;
pub mod parameter;
pub mod token;

pub use context::{RewriteContext, UnitScope};
pub use engine::{ExecutionUnit, RewriteEngine, SqlUnit};
pub use generator::{default_generators, TokenGenerator};
pub use parameter::ParameterMapping;
pub use token::{splice, SqlToken};
