use loam_runtime::{OpcodeRegistry, Runtime};
use serde_json::{Value, json};

async fn runtime_with_fs() -> Runtime {
    let mut registry = OpcodeRegistry::with_builtins().unwrap();
    loam_ops_fs::register(&mut registry).unwrap();
    Runtime::in_memory_with_registry(registry).await.unwrap()
}

async fn spawn(rt: &Runtime, props: Value) -> i64 {
    let store = rt.store();
    let store = store.lock().await;
    store.create_entity(props, None).await.unwrap()
}

async fn add_verb(rt: &Runtime, entity_id: i64, name: &str, code: Value) {
    let store = rt.store();
    let store = store.lock().await;
    store
        .add_verb(entity_id, name, &loam_ir::Expr::from_value(code), None)
        .await
        .unwrap();
}

async fn grant(rt: &Runtime, owner: i64, cap_type: &str, params: Value) -> String {
    let store = rt.store();
    let store = store.lock().await;
    store.create_capability(owner, cap_type, params).await.unwrap()
}

#[tokio::test]
async fn holder_reads_inside_the_sandbox_and_others_do_not() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("test.txt"), "sandbox contents").unwrap();
    let root = dir.path().to_str().unwrap();

    let rt = runtime_with_fs().await;
    let holder = spawn(&rt, json!({"name": "A"})).await;
    let outsider = spawn(&rt, json!({"name": "B"})).await;
    let cap = grant(&rt, holder, "fs.read", json!({"path": root})).await;

    let read = json!(["fs.read", ["list.get", ["args"], 0], "test.txt"]);
    add_verb(&rt, holder, "read_it", read.clone()).await;
    add_verb(&rt, outsider, "read_it", read).await;

    let out = rt
        .call_verb(holder, holder, "read_it", vec![json!(cap)])
        .await
        .unwrap();
    assert_eq!(out.value, json!("sandbox contents"));

    // The outsider replaying the holder's capability fails on ownership.
    let err = rt
        .call_verb(outsider, outsider, "read_it", vec![json!(cap)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not belong"));
}

#[tokio::test]
async fn paths_outside_the_prefix_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = dir.path().join("sandbox");
    std::fs::create_dir(&sandbox).unwrap();
    std::fs::write(dir.path().join("secret.txt"), "keep out").unwrap();

    let rt = runtime_with_fs().await;
    let holder = spawn(&rt, json!({})).await;
    let cap = grant(
        &rt,
        holder,
        "fs.read",
        json!({"path": sandbox.to_str().unwrap()}),
    )
    .await;

    add_verb(
        &rt,
        holder,
        "escape",
        json!(["fs.read", ["list.get", ["args"], 0], "../secret.txt"]),
    )
    .await;

    let err = rt
        .call_verb(holder, holder, "escape", vec![json!(cap)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("params do not permit"));
}

#[tokio::test]
async fn writes_cannot_traverse_out_through_missing_directories() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = dir.path().join("sandbox");
    std::fs::create_dir(&sandbox).unwrap();

    let rt = runtime_with_fs().await;
    let holder = spawn(&rt, json!({})).await;
    let cap = grant(
        &rt,
        holder,
        "fs.write",
        json!({"path": sandbox.to_str().unwrap()}),
    )
    .await;

    // Neither the target nor its parent exists, so resolution has to walk
    // up past the unresolved `..` hops instead of trusting them textually.
    add_verb(
        &rt,
        holder,
        "tunnel",
        json!(["fs.write", ["list.get", ["args"], 0], "notes/../../loot/evil.txt", "gotcha"]),
    )
    .await;
    let err = rt
        .call_verb(holder, holder, "tunnel", vec![json!(cap.clone())])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("params do not permit"));
    assert!(!dir.path().join("loot").exists());

    add_verb(
        &rt,
        holder,
        "tunnel_up",
        json!(["fs.write", ["list.get", ["args"], 0], "../loot/evil.txt", "gotcha"]),
    )
    .await;
    let err = rt
        .call_verb(holder, holder, "tunnel_up", vec![json!(cap)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("params do not permit"));
    assert!(!dir.path().join("loot").exists());
}

#[tokio::test]
async fn write_then_read_and_list_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap();

    let rt = runtime_with_fs().await;
    let holder = spawn(&rt, json!({})).await;
    let read_cap = grant(&rt, holder, "fs.read", json!({"path": root})).await;
    let write_cap = grant(&rt, holder, "fs.write", json!({"path": root})).await;

    add_verb(
        &rt,
        holder,
        "journal",
        json!([
            "seq",
            ["fs.write", ["list.get", ["args"], 0], "notes/today.txt", "dug the garden"],
            ["fs.read", ["list.get", ["args"], 1], "notes/today.txt"]
        ]),
    )
    .await;

    let out = rt
        .call_verb(
            holder,
            holder,
            "journal",
            vec![json!(write_cap), json!(read_cap.clone())],
        )
        .await
        .unwrap();
    assert_eq!(out.value, json!("dug the garden"));

    add_verb(
        &rt,
        holder,
        "survey",
        json!(["fs.list", ["list.get", ["args"], 0], "notes"]),
    )
    .await;
    let out = rt
        .call_verb(holder, holder, "survey", vec![json!(read_cap)])
        .await
        .unwrap();
    let listing = out.value.as_array().unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0]["name"], json!("today.txt"));
    assert_eq!(listing[0]["is_file"], json!(true));
}

#[tokio::test]
async fn read_capability_does_not_authorize_writes() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap();

    let rt = runtime_with_fs().await;
    let holder = spawn(&rt, json!({})).await;
    let read_cap = grant(&rt, holder, "fs.read", json!({"path": root})).await;

    add_verb(
        &rt,
        holder,
        "vandalize",
        json!(["fs.write", ["list.get", ["args"], 0], "x.txt", "scribble"]),
    )
    .await;

    let err = rt
        .call_verb(holder, holder, "vandalize", vec![json!(read_cap)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("type mismatch"));
    assert!(!dir.path().join("x.txt").exists());
}

#[tokio::test]
async fn exists_reports_without_reading() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("here.txt"), "x").unwrap();
    let root = dir.path().to_str().unwrap();

    let rt = runtime_with_fs().await;
    let holder = spawn(&rt, json!({})).await;
    let cap = grant(&rt, holder, "fs.read", json!({"path": root})).await;

    add_verb(
        &rt,
        holder,
        "check",
        json!(["list.of",
               ["fs.exists", ["list.get", ["args"], 0], "here.txt"],
               ["fs.exists", ["list.get", ["args"], 0], "gone.txt"]]),
    )
    .await;

    let out = rt
        .call_verb(holder, holder, "check", vec![json!(cap)])
        .await
        .unwrap();
    assert_eq!(out.value, json!([true, false]));
}
