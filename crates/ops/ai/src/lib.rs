//! Text-generation opcode gated by an `ai.generate` capability.
//!
//! The capability's params pin the provider: `endpoint` is the only URL the
//! holder may call, `model` (optional) pins the model name, and
//! `api_key_env` (optional) names the environment variable holding the
//! provider key. Scripts never see the key; it is read host-side at request
//! time.

use loam_core::{cap_types, check_capability};
use loam_ir::{Expr, OpcodeSpec, ParamSpec, ValueKind};
use loam_runtime::eval::{as_str, eval_args};
use loam_runtime::{OpFuture, OpcodeRegistry, RegistryError, ScriptContext, ScriptError};
use serde_json::{Value, json};

pub fn register(registry: &mut OpcodeRegistry) -> Result<(), RegistryError> {
    registry.register(
        OpcodeSpec::new("ai.generate", "Generate text", "ai", ValueKind::String).with_params(
            vec![
                ParamSpec::new("capability", ValueKind::Any),
                ParamSpec::new("prompt", ValueKind::String),
            ],
        ),
        op_generate,
    )?;
    Ok(())
}

fn op_generate<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        let values = eval_args(args, ctx).await?;
        if values.len() != 2 {
            return Err(ScriptError::Type(
                "ai.generate expects 2 arguments".to_string(),
            ));
        }
        let prompt = as_str(&values[1])?;

        let cap = {
            let store = ctx.store.lock().await;
            check_capability(
                &store,
                &values[0],
                &[ctx.this.id],
                cap_types::AI_GENERATE,
                Some(&|params: &Value| {
                    params.get("endpoint").and_then(Value::as_str).is_some()
                }),
            )
            .await?
        };

        let endpoint = cap
            .params
            .get("endpoint")
            .and_then(Value::as_str)
            .ok_or(loam_core::CapabilityError::ParamsRejected)?
            .to_string();
        let model = cap.params.get("model").and_then(Value::as_str);

        let mut body = json!({"prompt": prompt});
        if let Some(model) = model {
            body["model"] = json!(model);
        }

        let mut request = reqwest::Client::new().post(&endpoint).json(&body);
        if let Some(env_name) = cap.params.get("api_key_env").and_then(Value::as_str) {
            let key = std::env::var(env_name)
                .map_err(|_| ScriptError::Thrown(format!("api key env '{env_name}' not set")))?;
            request = request.bearer_auth(key);
        }

        tracing::debug!(entity = ctx.this.id, endpoint = %endpoint, "ai.generate");
        let response = request
            .send()
            .await
            .map_err(|e| ScriptError::Thrown(format!("generation request failed: {e}")))?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ScriptError::Thrown(format!("bad generation response: {e}")))?;

        // Providers differ in envelope; prefer a top-level "text" field and
        // fall back to the raw payload.
        match payload.get("text") {
            Some(Value::String(text)) => Ok(Value::String(text.clone())),
            _ => Ok(payload),
        }
    })
}
