//! The symbol table, type system, and typing rules that every lowering pass
//! consults. Types are resolved structurally; the environment threads
//! scope-stacked name bindings and frame-backed storage allocation through
//! the pipeline.

pub mod convert;
pub mod frame;
pub mod layout;
pub mod lvalue;
pub mod rvalue;
pub mod symbols;
pub mod type_context;
pub mod types;

pub use symbols::Env;
