mod support;

use serde_json::json;
use support::{add_verb, runtime, spawn};

#[tokio::test]
async fn prototype_verb_resolves_until_overridden() {
    let rt = runtime().await;
    let proto = spawn(&rt, json!({"name": "Thing"}), None).await;
    let item = spawn(&rt, json!({"name": "Sword"}), Some(proto)).await;
    add_verb(&rt, proto, "describe", json!("an ordinary thing")).await;

    let out = rt.call_verb(item, item, "describe", vec![]).await.unwrap();
    assert_eq!(out.value, json!("an ordinary thing"));

    add_verb(&rt, item, "describe", json!("a gleaming sword")).await;
    let out = rt.call_verb(item, item, "describe", vec![]).await.unwrap();
    assert_eq!(out.value, json!("a gleaming sword"));

    // The prototype keeps its own definition.
    let out = rt.call_verb(proto, proto, "describe", vec![]).await.unwrap();
    assert_eq!(out.value, json!("an ordinary thing"));
}

#[tokio::test]
async fn props_merge_through_the_chain_with_leaf_priority() {
    let rt = runtime().await;
    let proto = spawn(&rt, json!({"color": "red", "size": 1}), None).await;
    let item = spawn(&rt, json!({"size": 2}), Some(proto)).await;
    add_verb(
        &rt,
        item,
        "shape",
        json!(["list.of", ["prop", ["obj.get", ["this"], "id"], "color"],
               ["prop", ["obj.get", ["this"], "id"], "size"]]),
    )
    .await;

    let out = rt.call_verb(item, item, "shape", vec![]).await.unwrap();
    assert_eq!(out.value, json!(["red", 2]));
}

#[tokio::test]
async fn entity_view_includes_computed_properties() {
    let rt = runtime().await;
    let proto = spawn(&rt, json!({}), None).await;
    let item = spawn(&rt, json!({"name": "Lamp", "lit": true}), Some(proto)).await;
    // A getter inherited from the prototype computes from merged props.
    add_verb(
        &rt,
        proto,
        "get_display",
        json!(["if", ["obj.get", ["this"], "lit"],
               ["+", ["obj.get", ["this"], "name"], " (lit)"],
               ["obj.get", ["this"], "name"]]),
    )
    .await;

    let viewer = spawn(&rt, json!({}), None).await;
    add_verb(&rt, viewer, "look", json!(["entity", ["list.get", ["args"], 0]])).await;

    let out = rt
        .call_verb(viewer, viewer, "look", vec![json!(item)])
        .await
        .unwrap();
    assert_eq!(out.value["display"], json!("Lamp (lit)"));
    assert_eq!(out.value["name"], json!("Lamp"));
    assert_eq!(out.value["id"], json!(item));
}

#[tokio::test]
async fn failing_getter_degrades_to_a_warning() {
    let rt = runtime().await;
    let item = spawn(&rt, json!({"name": "Cursed"}), None).await;
    add_verb(&rt, item, "get_aura", json!(["throw", "unknowable"])).await;

    let viewer = spawn(&rt, json!({}), None).await;
    add_verb(&rt, viewer, "look", json!(["entity", ["list.get", ["args"], 0]])).await;

    let out = rt
        .call_verb(viewer, viewer, "look", vec![json!(item)])
        .await
        .unwrap();
    // The view still resolves; the aura is simply absent.
    assert_eq!(out.value["name"], json!("Cursed"));
    assert!(out.value.get("aura").is_none());
    assert_eq!(out.warnings.len(), 1);
    assert_eq!(out.warnings[0]["getter"], json!("get_aura"));
}

#[tokio::test]
async fn prop_falls_back_to_a_getter() {
    let rt = runtime().await;
    let item = spawn(&rt, json!({"base": 10}), None).await;
    add_verb(
        &rt,
        item,
        "get_doubled",
        json!(["*", ["obj.get", ["this"], "base"], 2]),
    )
    .await;

    let viewer = spawn(&rt, json!({}), None).await;
    add_verb(
        &rt,
        viewer,
        "peek",
        json!(["prop", ["list.get", ["args"], 0], "doubled"]),
    )
    .await;

    let out = rt
        .call_verb(viewer, viewer, "peek", vec![json!(item)])
        .await
        .unwrap();
    assert_eq!(out.value, json!(20.0));
}

#[tokio::test]
async fn missing_prop_without_getter_is_null() {
    let rt = runtime().await;
    let item = spawn(&rt, json!({}), None).await;
    let viewer = spawn(&rt, json!({}), None).await;
    add_verb(
        &rt,
        viewer,
        "peek",
        json!(["prop", ["list.get", ["args"], 0], "nonexistent"]),
    )
    .await;

    let out = rt
        .call_verb(viewer, viewer, "peek", vec![json!(item)])
        .await
        .unwrap();
    assert_eq!(out.value, serde_json::Value::Null);
}

#[tokio::test]
async fn verbs_lists_the_union_by_name() {
    let rt = runtime().await;
    let proto = spawn(&rt, json!({}), None).await;
    let item = spawn(&rt, json!({}), Some(proto)).await;
    add_verb(&rt, proto, "greet", json!("proto greeting")).await;
    add_verb(&rt, proto, "wave", json!("proto wave")).await;
    add_verb(&rt, item, "greet", json!("item greeting")).await;

    let viewer = spawn(&rt, json!({}), None).await;
    add_verb(&rt, viewer, "inspect", json!(["verbs", ["list.get", ["args"], 0]])).await;

    let out = rt
        .call_verb(viewer, viewer, "inspect", vec![json!(item)])
        .await
        .unwrap();
    let names: Vec<&str> = out
        .value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"greet"));
    assert!(names.contains(&"wave"));
}
