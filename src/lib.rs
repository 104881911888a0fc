//! Middle-end of the Snap compiler. The front end hands us a parsed syntax
//! tree; we lower the surface language (generics, traits, pattern matching,
//! implicit conversions, unions) down to a core language of labels, gotos,
//! and primitive operations, then map the flat instruction form it becomes
//! onto a fixed physical register file.
//!
//! The crate is organized around the data flow:
//!
//!   parsed tree -> [`lower`] pass pipeline (threading a [`sema::Env`])
//!               -> core-language [`ast::Block`]
//!               -> flat [`ir::Program`] (built by the external emitter)
//!               -> [`ir::block`] partitioning + [`ir::optimize`]
//!               -> [`regalloc`] linear scan + spilling

pub mod ast;
pub mod diagnostics;
pub mod index;
pub mod intern;
pub mod ir;
pub mod lower;
pub mod regalloc;
pub mod sema;
pub mod source;
