//! Filesystem opcodes with capability-based sandboxing.
//!
//! Every opcode takes a capability reference first and a path relative to
//! the sandbox root carried in the capability's `path` param. The reference
//! is re-validated against the store, then the path is canonicalized so
//! `../` hops and symlinks cannot escape the root.

use loam_core::{cap_types, check_capability};
use loam_ir::{Expr, OpcodeSpec, ParamSpec, ValueKind};
use loam_runtime::eval::{as_str, eval_args};
use loam_runtime::{OpFuture, OpcodeRegistry, RegistryError, ScriptContext, ScriptError};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

pub fn register(registry: &mut OpcodeRegistry) -> Result<(), RegistryError> {
    registry.register(
        OpcodeSpec::new("fs.read", "Read a file", "fs", ValueKind::String).with_params(vec![
            ParamSpec::new("capability", ValueKind::Any),
            ParamSpec::new("path", ValueKind::String),
        ]),
        op_read,
    )?;
    registry.register(
        OpcodeSpec::new("fs.write", "Write a file", "fs", ValueKind::Null).with_params(vec![
            ParamSpec::new("capability", ValueKind::Any),
            ParamSpec::new("path", ValueKind::String),
            ParamSpec::new("content", ValueKind::String),
        ]),
        op_write,
    )?;
    registry.register(
        OpcodeSpec::new("fs.list", "List a directory", "fs", ValueKind::Array).with_params(vec![
            ParamSpec::new("capability", ValueKind::Any),
            ParamSpec::new("path", ValueKind::String),
        ]),
        op_list,
    )?;
    registry.register(
        OpcodeSpec::new("fs.exists", "Path existence", "fs", ValueKind::Bool).with_params(vec![
            ParamSpec::new("capability", ValueKind::Any),
            ParamSpec::new("path", ValueKind::String),
        ]),
        op_exists,
    )?;
    Ok(())
}

/// Validate the capability and resolve `path` inside its sandbox root.
async fn sandboxed_path(
    ctx: &ScriptContext,
    cap_ref: &Value,
    required_type: &str,
    path: &str,
) -> Result<PathBuf, ScriptError> {
    let cap = {
        let store = ctx.store.lock().await;
        check_capability(
            &store,
            cap_ref,
            &[ctx.this.id],
            required_type,
            Some(&|params: &Value| params.get("path").and_then(Value::as_str).is_some()),
        )
        .await?
    };

    // A wildcard capability has no root and grants the whole tree.
    let root = match cap.params.get("path").and_then(Value::as_str) {
        Some(root) => PathBuf::from(root),
        None if cap.is_wildcard() => PathBuf::from("/"),
        None => return Err(loam_core::CapabilityError::ParamsRejected.into()),
    };

    resolve_under_root(&root, path).await
}

/// Join and canonicalize, rejecting anything that lands outside `root`.
/// Paths that do not exist yet are validated through their nearest existing
/// ancestor, so `fs.write` can create new files without opening an escape.
async fn resolve_under_root(root: &Path, relative: &str) -> Result<PathBuf, ScriptError> {
    let relative = relative.trim_start_matches('/');
    let full = root.join(relative);

    let canonical_root = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| ScriptError::Thrown(format!("invalid sandbox root: {e}")))?;

    if full.exists() {
        let canonical = tokio::fs::canonicalize(&full)
            .await
            .map_err(|e| ScriptError::Thrown(format!("invalid path: {e}")))?;
        if !canonical.starts_with(&canonical_root) {
            return Err(loam_core::CapabilityError::ParamsRejected.into());
        }
        return Ok(canonical);
    }

    // The path does not exist yet. Peel plain-name components off until an
    // existing ancestor is reached, canonicalize that, and re-append the
    // remainder. Anything that is not a plain name (`..`, a bare root) has
    // no real directory to resolve against and is rejected outright.
    let mut ancestor = full.as_path();
    let mut remainder = Vec::new();
    while !ancestor.exists() {
        match (ancestor.parent(), ancestor.file_name()) {
            (Some(parent), Some(name)) => {
                remainder.push(name.to_os_string());
                ancestor = parent;
            }
            _ => return Err(loam_core::CapabilityError::ParamsRejected.into()),
        }
    }

    let canonical_ancestor = tokio::fs::canonicalize(ancestor)
        .await
        .map_err(|e| ScriptError::Thrown(format!("invalid path: {e}")))?;
    if !canonical_ancestor.starts_with(&canonical_root) {
        return Err(loam_core::CapabilityError::ParamsRejected.into());
    }

    let mut resolved = canonical_ancestor;
    for name in remainder.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

fn op_read<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        let values = eval_args(args, ctx).await?;
        if values.len() != 2 {
            return Err(ScriptError::Type("fs.read expects 2 arguments".to_string()));
        }
        let path = as_str(&values[1])?;
        let full = sandboxed_path(ctx, &values[0], cap_types::FS_READ, path).await?;

        tracing::debug!(entity = ctx.this.id, path = %full.display(), "fs.read");
        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| ScriptError::Thrown(format!("failed to read {path}: {e}")))?;
        Ok(Value::String(content))
    })
}

fn op_write<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        let values = eval_args(args, ctx).await?;
        if values.len() != 3 {
            return Err(ScriptError::Type("fs.write expects 3 arguments".to_string()));
        }
        let path = as_str(&values[1])?;
        let content = as_str(&values[2])?;
        let full = sandboxed_path(ctx, &values[0], cap_types::FS_WRITE, path).await?;

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ScriptError::Thrown(format!("failed to create directory: {e}")))?;
        }
        tracing::debug!(entity = ctx.this.id, path = %full.display(), "fs.write");
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| ScriptError::Thrown(format!("failed to write {path}: {e}")))?;
        Ok(Value::Null)
    })
}

fn op_list<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        let values = eval_args(args, ctx).await?;
        if values.len() != 2 {
            return Err(ScriptError::Type("fs.list expects 2 arguments".to_string()));
        }
        let path = as_str(&values[1])?;
        let full = sandboxed_path(ctx, &values[0], cap_types::FS_READ, path).await?;

        let mut dir = tokio::fs::read_dir(&full)
            .await
            .map_err(|e| ScriptError::Thrown(format!("failed to list {path}: {e}")))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ScriptError::Thrown(format!("failed to list {path}: {e}")))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| ScriptError::Thrown(format!("failed to stat entry: {e}")))?;
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "is_dir": meta.is_dir(),
                "is_file": meta.is_file(),
                "size": meta.len(),
            }));
        }
        Ok(Value::Array(entries))
    })
}

fn op_exists<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        let values = eval_args(args, ctx).await?;
        if values.len() != 2 {
            return Err(ScriptError::Type(
                "fs.exists expects 2 arguments".to_string(),
            ));
        }
        let path = as_str(&values[1])?;
        let full = sandboxed_path(ctx, &values[0], cap_types::FS_READ, path).await?;
        Ok(Value::Bool(full.exists()))
    })
}
