mod support;

use serde_json::json;
use support::{add_verb, grant, prop_of, runtime, spawn};

#[tokio::test]
async fn create_returns_the_id_and_grants_control() {
    let rt = runtime().await;
    let maker = spawn(&rt, json!({}), None).await;
    add_verb(
        &rt,
        maker,
        "build",
        json!(["create", {"name": "Widget"}]),
    )
    .await;

    let out = rt.call_verb(maker, maker, "build", vec![]).await.unwrap();
    let new_id = out.value.as_i64().unwrap();
    assert_eq!(prop_of(&rt, new_id, "name").await, json!("Widget"));

    // The creator received entity.control for what it made.
    add_verb(
        &rt,
        maker,
        "find_control",
        json!(["capability", "entity.control", {"target_id": ["list.get", ["args"], 0]}]),
    )
    .await;
    let found = rt
        .call_verb(maker, maker, "find_control", vec![json!(new_id)])
        .await
        .unwrap();
    assert_eq!(found.value["type"], json!("entity.control"));
}

#[tokio::test]
async fn create_with_a_prototype_inherits() {
    let rt = runtime().await;
    let maker = spawn(&rt, json!({}), None).await;
    let proto = spawn(&rt, json!({"kind": "tool"}), None).await;
    add_verb(
        &rt,
        maker,
        "build",
        json!(["create", {"name": "Hammer"}, ["list.get", ["args"], 0]]),
    )
    .await;

    let out = rt
        .call_verb(maker, maker, "build", vec![json!(proto)])
        .await
        .unwrap();
    let new_id = out.value.as_i64().unwrap();
    assert_eq!(prop_of(&rt, new_id, "kind").await, json!("tool"));
}

#[tokio::test]
async fn update_on_self_needs_no_capability() {
    let rt = runtime().await;
    let e = spawn(&rt, json!({"mood": "flat"}), None).await;
    add_verb(
        &rt,
        e,
        "cheer",
        json!(["entity.update", null, ["obj.get", ["this"], "id"], {"mood": "bright"}]),
    )
    .await;

    rt.call_verb(e, e, "cheer", vec![]).await.unwrap();
    assert_eq!(prop_of(&rt, e, "mood").await, json!("bright"));
}

#[tokio::test]
async fn update_on_another_entity_needs_the_capability() {
    let rt = runtime().await;
    let actor = spawn(&rt, json!({}), None).await;
    let other = spawn(&rt, json!({}), None).await;
    add_verb(
        &rt,
        actor,
        "poke",
        json!(["entity.update", null, ["list.get", ["args"], 0], {"poked": true}]),
    )
    .await;

    let err = rt
        .call_verb(actor, actor, "poke", vec![json!(other)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("permission denied"));
    assert_eq!(prop_of(&rt, other, "poked").await, serde_json::Value::Null);
}

#[tokio::test]
async fn reserved_fields_are_rejected_before_any_write() {
    let rt = runtime().await;
    let e = spawn(&rt, json!({}), None).await;
    add_verb(
        &rt,
        e,
        "take_identity",
        json!(["entity.update", null, ["obj.get", ["this"], "id"], {"id": 999}]),
    )
    .await;
    add_verb(
        &rt,
        e,
        "reparent",
        json!(["prop.set", null, ["obj.get", ["this"], "id"], "prototype_id", 1]),
    )
    .await;

    let err = rt.call_verb(e, e, "take_identity", vec![]).await.unwrap_err();
    assert_eq!(err.to_string(), "cannot update 'id'");

    let err = rt.call_verb(e, e, "reparent", vec![]).await.unwrap_err();
    assert_eq!(err.to_string(), "cannot update 'prototype_id'");
}

#[tokio::test]
async fn prop_set_writes_a_single_property() {
    let rt = runtime().await;
    let e = spawn(&rt, json!({"hp": 10}), None).await;
    add_verb(
        &rt,
        e,
        "heal",
        json!(["prop.set", null, ["obj.get", ["this"], "id"], "hp", 20]),
    )
    .await;

    rt.call_verb(e, e, "heal", vec![]).await.unwrap();
    assert_eq!(prop_of(&rt, e, "hp").await, json!(20.0));
}

#[tokio::test]
async fn move_updates_location() {
    let rt = runtime().await;
    let room = spawn(&rt, json!({"name": "Hall"}), None).await;
    let player = spawn(&rt, json!({"name": "Ada"}), None).await;
    add_verb(
        &rt,
        player,
        "go",
        json!(["move", null, ["obj.get", ["this"], "id"], ["list.get", ["args"], 0]]),
    )
    .await;

    rt.call_verb(player, player, "go", vec![json!(room)])
        .await
        .unwrap();
    assert_eq!(prop_of(&rt, player, "location").await, json!(room));
}

#[tokio::test]
async fn self_containment_is_rejected_and_nothing_changes() {
    let rt = runtime().await;
    let actor = spawn(&rt, json!({}), None).await;
    let box_outer = spawn(&rt, json!({}), None).await;
    let box_inner = spawn(&rt, json!({"location": null}), None).await;
    let cap_outer = grant(&rt, actor, "entity.control", json!({"target_id": box_outer})).await;
    let cap_inner = grant(&rt, actor, "entity.control", json!({"target_id": box_inner})).await;
    add_verb(
        &rt,
        actor,
        "put",
        json!(["move", ["list.get", ["args"], 0],
               ["list.get", ["args"], 1], ["list.get", ["args"], 2]]),
    )
    .await;

    // inner goes into outer, then outer into inner would close the loop.
    rt.call_verb(actor, actor, "put", vec![json!(cap_inner), json!(box_inner), json!(box_outer)])
        .await
        .unwrap();
    let err = rt
        .call_verb(actor, actor, "put", vec![json!(cap_outer), json!(box_outer), json!(box_inner)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("contain itself"));
    assert_eq!(prop_of(&rt, box_outer, "location").await, serde_json::Value::Null);

    // Directly into itself is the degenerate case.
    let err = rt
        .call_verb(actor, actor, "put", vec![json!(cap_outer), json!(box_outer), json!(box_outer)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("contain itself"));
}

#[tokio::test]
async fn destroy_always_requires_the_capability() {
    let rt = runtime().await;
    let e = spawn(&rt, json!({}), None).await;
    add_verb(
        &rt,
        e,
        "self_destruct",
        json!(["destroy", null, ["obj.get", ["this"], "id"]]),
    )
    .await;

    // Even self-destruction presents a capability; null is not accepted.
    let err = rt.call_verb(e, e, "self_destruct", vec![]).await.unwrap_err();
    assert!(err.to_string().contains("malformed capability"));
}

#[tokio::test]
async fn destroy_cascades_verbs_and_capabilities() {
    let rt = runtime().await;
    let reaper = spawn(&rt, json!({}), None).await;
    let doomed = spawn(&rt, json!({}), None).await;
    add_verb(&rt, doomed, "lament", json!("alas")).await;
    grant(&rt, doomed, "fs.read", json!({"path": "/tmp"})).await;
    let cap = grant(&rt, reaper, "entity.control", json!({"target_id": doomed})).await;
    add_verb(
        &rt,
        reaper,
        "reap",
        json!(["destroy", ["list.get", ["args"], 0], ["list.get", ["args"], 1]]),
    )
    .await;

    rt.call_verb(reaper, reaper, "reap", vec![json!(cap), json!(doomed)])
        .await
        .unwrap();

    let store = rt.store();
    let store = store.lock().await;
    assert!(store.get_entity(doomed).await.unwrap().is_none());
    assert!(store.get_verb(doomed, "lament").await.unwrap().is_none());
    assert!(store.get_capabilities(doomed).await.unwrap().is_empty());
}

#[tokio::test]
async fn tell_reaches_the_host_channel() {
    let rt = runtime().await;
    use std::sync::{Arc, Mutex};
    let seen: Arc<Mutex<Vec<(String, serde_json::Value)>>> = Arc::new(Mutex::new(Vec::new()));

    let e = spawn(&rt, json!({}), None).await;
    let listener = spawn(&rt, json!({}), None).await;
    add_verb(
        &rt,
        e,
        "shout",
        json!(["tell", ["list.get", ["args"], 0], "hello there"]),
    )
    .await;

    let sink = Arc::clone(&seen);
    let send: loam_runtime::SendFn = Arc::new(move |kind: &str, payload: &serde_json::Value| {
        sink.lock().unwrap().push((kind.to_string(), payload.clone()));
    });
    rt.call_verb_with(e, e, "shout", vec![json!(listener)], 1_000, Some(send))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "tell");
    assert_eq!(seen[0].1["target"], json!(listener));
    assert_eq!(seen[0].1["message"], json!("hello there"));
}

#[tokio::test]
async fn schedule_persists_and_process_runs_the_verb() {
    let rt = runtime().await;
    let clock = spawn(&rt, json!({"ticks": 0}), None).await;
    add_verb(
        &rt,
        clock,
        "arm",
        json!(["schedule", "tick", [], 0]),
    )
    .await;
    add_verb(
        &rt,
        clock,
        "tick",
        json!(["entity.update", null, ["obj.get", ["this"], "id"], {"ticks": 1}]),
    )
    .await;

    rt.call_verb(clock, clock, "arm", vec![]).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    rt.process_scheduled().await.unwrap();

    assert_eq!(prop_of(&rt, clock, "ticks").await, json!(1.0));
}

#[tokio::test]
async fn failed_scheduled_task_does_not_poison_the_pass() {
    let rt = runtime().await;
    let clock = spawn(&rt, json!({}), None).await;
    add_verb(&rt, clock, "bad", json!(["throw", "scheduled failure"])).await;
    add_verb(
        &rt,
        clock,
        "good",
        json!(["entity.update", null, ["obj.get", ["this"], "id"], {"ran": true}]),
    )
    .await;
    add_verb(
        &rt,
        clock,
        "arm",
        json!(["seq", ["schedule", "bad", [], 0], ["schedule", "good", [], 0]]),
    )
    .await;

    rt.call_verb(clock, clock, "arm", vec![]).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    rt.process_scheduled().await.unwrap();

    assert_eq!(prop_of(&rt, clock, "ran").await, json!(true));
}
