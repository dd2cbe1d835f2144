#![allow(dead_code)]

use loam_ir::Expr;
use loam_runtime::Runtime;
use serde_json::Value;

pub fn expr(value: Value) -> Expr {
    Expr::from_value(value)
}

pub async fn runtime() -> Runtime {
    Runtime::in_memory().await.unwrap()
}

pub async fn spawn(rt: &Runtime, props: Value, prototype: Option<i64>) -> i64 {
    let store = rt.store();
    let store = store.lock().await;
    store.create_entity(props, prototype).await.unwrap()
}

pub async fn add_verb(rt: &Runtime, entity_id: i64, name: &str, code: Value) {
    let store = rt.store();
    let store = store.lock().await;
    store
        .add_verb(entity_id, name, &expr(code), None)
        .await
        .unwrap();
}

pub async fn grant(rt: &Runtime, owner: i64, cap_type: &str, params: Value) -> String {
    let store = rt.store();
    let store = store.lock().await;
    store.create_capability(owner, cap_type, params).await.unwrap()
}

pub async fn prop_of(rt: &Runtime, entity_id: i64, key: &str) -> Value {
    let store = rt.store();
    let store = store.lock().await;
    store
        .get_entity_merged(entity_id)
        .await
        .unwrap()
        .unwrap()
        .prop(key)
        .cloned()
        .unwrap_or(Value::Null)
}
