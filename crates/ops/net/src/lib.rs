//! HTTP opcodes with capability-based access control.
//!
//! A `net.http` capability carries a `url` prefix pattern (or `"*"`) and an
//! optional `methods` allow-list. Both are checked against the persisted
//! record before any request leaves the process.

use loam_core::{cap_types, check_capability};
use loam_ir::{Expr, OpcodeSpec, ParamSpec, ValueKind};
use loam_runtime::eval::{as_str, eval_args};
use loam_runtime::{OpFuture, OpcodeRegistry, RegistryError, ScriptContext, ScriptError};
use serde_json::{Value, json};

pub fn register(registry: &mut OpcodeRegistry) -> Result<(), RegistryError> {
    registry.register(
        OpcodeSpec::new("net.http.get", "HTTP GET", "net", ValueKind::Object).with_params(vec![
            ParamSpec::new("capability", ValueKind::Any),
            ParamSpec::new("url", ValueKind::String),
        ]),
        op_get,
    )?;
    registry.register(
        OpcodeSpec::new("net.http.post", "HTTP POST", "net", ValueKind::Object).with_params(vec![
            ParamSpec::new("capability", ValueKind::Any),
            ParamSpec::new("url", ValueKind::String),
            ParamSpec::new("body", ValueKind::Any),
        ]),
        op_post,
    )?;
    Ok(())
}

/// True if the capability params allow `method` against `url`.
fn request_allowed(params: &Value, url: &str, method: &str) -> bool {
    let url_ok = match params.get("url").and_then(Value::as_str) {
        Some("*") => true,
        Some(prefix) => url.starts_with(prefix),
        None => false,
    };
    let method_ok = match params.get("methods") {
        Some(Value::Array(allowed)) => allowed.iter().any(|m| m.as_str() == Some(method)),
        // No allow-list means any method under the granted URL.
        None => true,
        Some(_) => false,
    };
    url_ok && method_ok
}

async fn authorize(
    ctx: &ScriptContext,
    cap_ref: &Value,
    url: &str,
    method: &str,
) -> Result<(), ScriptError> {
    let url = url.to_string();
    let method = method.to_string();
    let store = ctx.store.lock().await;
    check_capability(
        &store,
        cap_ref,
        &[ctx.this.id],
        cap_types::NET_HTTP,
        Some(&move |params: &Value| request_allowed(params, &url, &method)),
    )
    .await?;
    Ok(())
}

/// Status plus body; JSON bodies come back structured, anything else as a
/// string.
async fn response_value(response: reqwest::Response) -> Result<Value, ScriptError> {
    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .map_err(|e| ScriptError::Thrown(format!("failed to read response: {e}")))?;
    let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
    Ok(json!({"status": status, "body": body}))
}

fn op_get<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        let values = eval_args(args, ctx).await?;
        if values.len() != 2 {
            return Err(ScriptError::Type(
                "net.http.get expects 2 arguments".to_string(),
            ));
        }
        let url = as_str(&values[1])?;
        authorize(ctx, &values[0], url, "GET").await?;

        tracing::debug!(entity = ctx.this.id, url, "net.http.get");
        let response = reqwest::get(url)
            .await
            .map_err(|e| ScriptError::Thrown(format!("request failed: {e}")))?;
        response_value(response).await
    })
}

fn op_post<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        let values = eval_args(args, ctx).await?;
        if values.len() != 3 {
            return Err(ScriptError::Type(
                "net.http.post expects 3 arguments".to_string(),
            ));
        }
        let url = as_str(&values[1])?;
        authorize(ctx, &values[0], url, "POST").await?;

        tracing::debug!(entity = ctx.this.id, url, "net.http.post");
        let response = reqwest::Client::new()
            .post(url)
            .json(&values[2])
            .send()
            .await
            .map_err(|e| ScriptError::Thrown(format!("request failed: {e}")))?;
        response_value(response).await
    })
}
