mod support;

use loam_runtime::{RuntimeError, ScriptError};
use serde_json::json;
use support::{add_verb, grant, prop_of, runtime, spawn};

#[tokio::test]
async fn nested_calls_share_one_gas_budget() {
    let rt = runtime().await;
    let outer = spawn(&rt, json!({}), None).await;
    let inner = spawn(&rt, json!({}), None).await;
    add_verb(
        &rt,
        inner,
        "spin",
        json!(["for", "i", [1, 2, 3, 4, 5, 6, 7, 8, 9, 10], ["+", 1, 1]]),
    )
    .await;
    add_verb(
        &rt,
        outer,
        "delegate_work",
        json!(["call", ["list.get", ["args"], 0], "spin"]),
    )
    .await;

    // The callee cannot outspend the caller's budget.
    let err = rt
        .call_verb_with(outer, outer, "delegate_work", vec![json!(inner)], 10, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Script(ScriptError::GasExhausted)
    ));

    // With enough budget the nested run completes, and the spend is visible
    // to the outer invocation.
    let out = rt
        .call_verb_with(outer, outer, "delegate_work", vec![json!(inner)], 1_000, None)
        .await
        .unwrap();
    assert!(out.gas_remaining < 1_000 - 20);
}

#[tokio::test]
async fn capability_checks_run_against_the_callee() {
    let rt = runtime().await;
    let steward = spawn(&rt, json!({}), None).await;
    let visitor = spawn(&rt, json!({}), None).await;
    let ledger = spawn(&rt, json!({"entries": 0}), None).await;
    let cap = grant(&rt, steward, "entity.control", json!({"target_id": ledger})).await;

    // The steward exposes a verb that uses its own capability.
    add_verb(
        &rt,
        steward,
        "record",
        json!(["entity.update", ["list.get", ["args"], 0],
               ["list.get", ["args"], 1], {"entries": 1}]),
    )
    .await;
    // A visitor going through the steward succeeds: inside the callee,
    // `this` is the steward, who owns the capability.
    add_verb(
        &rt,
        visitor,
        "ask_steward",
        json!(["call", ["list.get", ["args"], 0], "record",
               ["list.get", ["args"], 1], ["list.get", ["args"], 2]]),
    )
    .await;

    rt.call_verb(
        visitor,
        visitor,
        "ask_steward",
        vec![json!(steward), json!(cap), json!(ledger)],
    )
    .await
    .unwrap();
    assert_eq!(prop_of(&rt, ledger, "entries").await, json!(1.0));

    // The visitor replaying the steward's capability directly fails: the
    // record is owned by the steward, not the visitor.
    add_verb(
        &rt,
        visitor,
        "replay",
        json!(["entity.update", ["list.get", ["args"], 0],
               ["list.get", ["args"], 1], {"entries": 99}]),
    )
    .await;
    let err = rt
        .call_verb(visitor, visitor, "replay", vec![json!(cap), json!(ledger)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not belong"));
    assert_eq!(prop_of(&rt, ledger, "entries").await, json!(1.0));
}

#[tokio::test]
async fn callee_errors_propagate_to_the_caller() {
    let rt = runtime().await;
    let outer = spawn(&rt, json!({}), None).await;
    let inner = spawn(&rt, json!({}), None).await;
    add_verb(&rt, inner, "explode", json!(["throw", "inner failure"])).await;
    add_verb(
        &rt,
        outer,
        "risky",
        json!(["call", ["list.get", ["args"], 0], "explode"]),
    )
    .await;
    add_verb(
        &rt,
        outer,
        "careful",
        json!(["try", ["call", ["list.get", ["args"], 0], "explode"], "e", ["var", "e"]]),
    )
    .await;

    let err = rt
        .call_verb(outer, outer, "risky", vec![json!(inner)])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "inner failure");

    let out = rt
        .call_verb(outer, outer, "careful", vec![json!(inner)])
        .await
        .unwrap();
    assert_eq!(out.value, json!("inner failure"));
}

#[tokio::test]
async fn calling_a_missing_verb_or_entity_fails_cleanly() {
    let rt = runtime().await;
    let e = spawn(&rt, json!({}), None).await;
    add_verb(
        &rt,
        e,
        "reach",
        json!(["call", ["list.get", ["args"], 0], "nothing"]),
    )
    .await;

    let err = rt
        .call_verb(e, e, "reach", vec![json!(e)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("verb 'nothing' not found"));

    let err = rt
        .call_verb(e, e, "reach", vec![json!(99_999)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("entity not found"));
}

#[tokio::test]
async fn deep_recursion_is_stopped_by_gas() {
    let rt = runtime().await;
    let e = spawn(&rt, json!({}), None).await;
    // A verb that calls itself forever can only ever burn its budget.
    add_verb(
        &rt,
        e,
        "forever",
        json!(["call", ["obj.get", ["this"], "id"], "forever"]),
    )
    .await;

    let err = rt
        .call_verb_with(e, e, "forever", vec![], 200, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Script(ScriptError::GasExhausted)
    ));
}

#[tokio::test]
async fn getter_budget_is_isolated_from_the_caller() {
    let rt = runtime().await;
    let item = spawn(&rt, json!({}), None).await;
    // A getter that burns far more than the caller's remaining budget.
    add_verb(
        &rt,
        item,
        "get_heavy",
        json!(["for", "i", [1, 2, 3, 4, 5, 6, 7, 8, 9, 10], ["+", 1, 1]]),
    )
    .await;

    let viewer = spawn(&rt, json!({}), None).await;
    add_verb(&rt, viewer, "look", json!(["entity", ["list.get", ["args"], 0]])).await;

    // 10 gas would never cover the getter if it drew from this budget.
    let out = rt
        .call_verb_with(viewer, viewer, "look", vec![json!(item)], 10, None)
        .await
        .unwrap();
    assert_eq!(out.value["heavy"], serde_json::Value::Null);
    assert!(out.warnings.is_empty());
}

#[tokio::test]
async fn scripts_cannot_fabricate_capabilities() {
    let rt = runtime().await;
    let schemer = spawn(&rt, json!({}), None).await;
    let victim = spawn(&rt, json!({}), None).await;
    // A hand-built map with the right shape is still not a persisted record.
    add_verb(
        &rt,
        schemer,
        "fabricate",
        json!(["entity.update",
               {"id": "11111111-2222-3333-4444-555555555555",
                "type": "entity.control",
                "params": {"*": true}},
               ["list.get", ["args"], 0],
               {"stolen": true}]),
    )
    .await;

    let err = rt
        .call_verb(schemer, schemer, "fabricate", vec![json!(victim)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));
    assert_eq!(prop_of(&rt, victim, "stolen").await, serde_json::Value::Null);
}
