//! Clock opcodes.

use super::expect_arity;
use crate::context::ScriptContext;
use crate::registry::{OpFuture, OpcodeRegistry, RegistryError};
use loam_ir::{Expr, OpcodeSpec, ValueKind};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn register(registry: &mut OpcodeRegistry) -> Result<(), RegistryError> {
    registry.register(
        OpcodeSpec::new("time.now", "Unix time in ms", "time", ValueKind::Number),
        op_now,
    )?;
    registry.register(
        OpcodeSpec::new("time.iso", "UTC timestamp string", "time", ValueKind::String),
        op_iso,
    )?;
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn op_now<'a>(args: &'a [Expr], _ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("time.now", args, 0)?;
        Ok(serde_json::json!(now_ms()))
    })
}

fn op_iso<'a>(args: &'a [Expr], _ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("time.iso", args, 0)?;
        Ok(Value::String(iso_utc(now_ms())))
    })
}

/// Render Unix milliseconds as `YYYY-MM-DDTHH:MM:SS.mmmZ` without pulling in
/// a date crate; civil-from-days per Howard Hinnant's algorithm.
fn iso_utc(unix_ms: u64) -> String {
    let secs = (unix_ms / 1000) as i64;
    let millis = unix_ms % 1000;
    let days = secs.div_euclid(86_400);
    let rem = secs.rem_euclid(86_400);
    let (hour, minute, second) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { year + 1 } else { year };

    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millis:03}Z")
}
