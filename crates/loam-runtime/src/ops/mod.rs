//! Built-in opcode libraries.
//!
//! Each submodule registers one library. Handlers are free functions with
//! the [`crate::registry::OpHandler`] signature; laziness is expressed by
//! simply not evaluating an argument node.

use crate::error::ScriptError;
use crate::registry::{OpcodeRegistry, RegistryError};
use loam_ir::Expr;

pub mod core;
pub mod entity;
pub mod list;
pub mod logic;
pub mod math;
pub mod obj;
pub mod strings;
pub mod time;

pub fn register_builtins(registry: &mut OpcodeRegistry) -> Result<(), RegistryError> {
    core::register(registry)?;
    logic::register(registry)?;
    math::register(registry)?;
    list::register(registry)?;
    obj::register(registry)?;
    strings::register(registry)?;
    time::register(registry)?;
    entity::register(registry)?;
    Ok(())
}

/// Exactly `n` arguments, or a type error naming the opcode.
pub(crate) fn expect_arity(op: &str, args: &[Expr], n: usize) -> Result<(), ScriptError> {
    if args.len() != n {
        return Err(ScriptError::Type(format!(
            "{op} expects {n} argument{}, got {}",
            if n == 1 { "" } else { "s" },
            args.len()
        )));
    }
    Ok(())
}

/// At least `n` arguments.
pub(crate) fn expect_min_arity(op: &str, args: &[Expr], n: usize) -> Result<(), ScriptError> {
    if args.len() < n {
        return Err(ScriptError::Type(format!(
            "{op} expects at least {n} argument{}, got {}",
            if n == 1 { "" } else { "s" },
            args.len()
        )));
    }
    Ok(())
}

/// An argument node that must be a literal identifier (variable names).
pub(crate) fn expect_ident<'a>(op: &str, node: &'a Expr) -> Result<&'a str, ScriptError> {
    match node {
        Expr::String(name) => Ok(name),
        _ => Err(ScriptError::Type(format!(
            "{op} expects a literal name, got {:?}",
            node
        ))),
    }
}
