//! Script AST and opcode metadata schema for Loam.
//!
//! Verbs are stored as trees of [`Expr`] nodes. On the wire a node is plain
//! JSON: literals map to JSON scalars, maps to objects, and an array whose
//! first element is a string is an opcode call. [`schema`] describes opcodes
//! declaratively for external tooling (editors, doc generators); the
//! interpreter itself never reads it.

pub mod expr;
pub mod schema;

pub use expr::Expr;
pub use schema::{OpcodeSchema, OpcodeSpec, ParamSpec, ValueKind};
