use anyhow::Result;
use mds::{Arguments, BoxError, Bindings, sandbox::{Connection, Value}};
use serde_json::json;

use super::common::{args, connect_with, guest_message};

fn host() -> Bindings {
    Bindings::new()
        .bind_sync("double", |args| {
            let n = args.first().and_then(Value::as_i64).unwrap_or_default();
            Ok(json!(n * 2))
        })
        .bind("lookup", |args| async move {
            tokio::task::yield_now().await;
            let key = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
            Ok(json!({ "key": key, "found": true }))
        })
        .bind("fail", |_| async { Err::<Value, BoxError>("nope".into()) })
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_binding_is_callable() -> Result<()> {
    let conn = connect_with(
        "function go(args, done) { done(double(args.n)); }",
        &["go"],
        host(),
    )
    .await?;
    assert_eq!(conn.call("go", args(json!({ "n": 21 }))?).await?, json!(42));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn async_binding_is_awaited() -> Result<()> {
    let conn = connect_with(
        "function go(args, done) { const r = lookup('k', 1); done(r.found ? r.key : null); }",
        &["go"],
        host(),
    )
    .await?;
    assert_eq!(conn.call("go", Arguments::new()).await?, json!("k"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn binding_errors_are_catchable() -> Result<()> {
    let conn = connect_with(
        "function safe(args, done) { try { fail(); } catch (e) { done('caught: ' + e.message); } }\n\
         function careless(args, done) { done(fail()); }",
        &["safe", "careless"],
        host(),
    )
    .await?;

    let caught = conn.call("safe", Arguments::new()).await?;
    let caught = caught.as_str().unwrap_or_default();
    assert!(caught.starts_with("caught: "), "{caught}");
    assert!(caught.contains("nope"), "{caught}");

    let err = conn.call("careless", Arguments::new()).await.expect_err("uncaught");
    assert!(guest_message(&err)?.contains("nope"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn bindings_are_usable_at_load_time() -> Result<()> {
    let conn = connect_with(
        "const base = double(5);\nfunction go(args, done) { done(base); }",
        &["go"],
        host(),
    )
    .await?;
    assert_eq!(conn.call("go", Arguments::new()).await?, json!(10));
    Ok(())
}
