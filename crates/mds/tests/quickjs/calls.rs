use anyhow::{Context, Result};
use mds::{Arguments, sandbox::Connection};
use serde_json::json;

use super::common::{args, connect, guest_message};

#[tokio::test]
async fn callback_convention() -> Result<()> {
    let conn = connect("function add(args, done) { done(args.a + args.b); }", &["add"])
        .await
        .context("failed to start sandbox")?;
    let value = conn.call("add", args(json!({ "a": 1, "b": 2 }))?).await?;
    assert_eq!(value, json!(3));
    Ok(())
}

#[tokio::test]
async fn return_value_convention() -> Result<()> {
    let conn = connect(
        "function greet(args) { return { output: 'Hello ' + args.name }; }",
        &["greet"],
    )
    .await?;
    let value = conn.call("greet", args(json!({ "name": "World" }))?).await?;
    assert_eq!(value, json!({ "output": "Hello World" }));
    Ok(())
}

#[tokio::test]
async fn promises_are_driven_to_completion() -> Result<()> {
    let conn = connect(
        "async function later() { await null; return 'late'; }\n\
         function deferred(args, done) { Promise.resolve(7).then(done); }",
        &["later", "deferred"],
    )
    .await?;
    assert_eq!(conn.call("later", Arguments::new()).await?, json!("late"));
    assert_eq!(conn.call("deferred", Arguments::new()).await?, json!(7));
    Ok(())
}

#[tokio::test]
async fn lexical_declarations_are_entry_points() -> Result<()> {
    let conn = connect("const arrow = (args, done) => done('arrow');", &["arrow"]).await?;
    assert_eq!(conn.call("arrow", Arguments::new()).await?, json!("arrow"));
    Ok(())
}

#[tokio::test]
async fn undefined_result_is_null() -> Result<()> {
    let conn = connect("function nothing(args, done) { done(undefined); }", &["nothing"]).await?;
    assert_eq!(conn.call("nothing", Arguments::new()).await?, json!(null));
    Ok(())
}

#[tokio::test]
async fn state_persists_between_calls() -> Result<()> {
    let conn = connect("let n = 0;\nfunction tick(args, done) { done(++n); }", &["tick"]).await?;
    assert_eq!(conn.call("tick", Arguments::new()).await?, json!(1));
    assert_eq!(conn.call("tick", Arguments::new()).await?, json!(2));
    Ok(())
}

#[tokio::test]
async fn silent_entry_point_fails_instead_of_hanging() -> Result<()> {
    let conn = connect("function nothing() {}", &["nothing"]).await?;
    let err = conn
        .call("nothing", Arguments::new())
        .await
        .expect_err("no result was produced");
    assert!(guest_message(&err)?.contains("did not produce a result"));
    Ok(())
}

#[tokio::test]
async fn guest_exceptions_surface() -> Result<()> {
    let conn = connect(
        "function boom() { throw new Error('kaboom'); }\n\
         async function reject() { throw new Error('rejected'); }",
        &["boom", "reject"],
    )
    .await?;

    let err = conn.call("boom", Arguments::new()).await.expect_err("throws");
    assert!(guest_message(&err)?.contains("kaboom"));

    let err = conn.call("reject", Arguments::new()).await.expect_err("rejects");
    assert!(guest_message(&err)?.contains("rejected"));

    // The sandbox survives a failed call.
    let err = conn.call("boom", Arguments::new()).await.expect_err("throws again");
    assert!(guest_message(&err)?.contains("kaboom"));
    Ok(())
}

#[tokio::test]
async fn missing_entry_point_fails_to_connect() -> Result<()> {
    let Err(err) = connect("function present() {}", &["present", "absent"]).await else {
        anyhow::bail!("connect should fail");
    };
    assert!(guest_message(&err)?.contains("`absent`"));
    Ok(())
}

#[tokio::test]
async fn syntax_errors_fail_to_connect() -> Result<()> {
    let Err(err) = connect("function (", &[]).await else {
        anyhow::bail!("connect should fail");
    };
    assert!(matches!(err, mds::Error::Guest { .. }));
    Ok(())
}

#[tokio::test]
async fn memory_limit_is_enforced() -> Result<()> {
    use mds::{
        Bindings, EntryPoints, LogicPayload,
        sandbox::{Runtime, quickjs::QuickJs},
    };

    let conn = QuickJs::new()
        .max_memory(Some(4 * 1024 * 1024))
        .connect(
            LogicPayload::new(
                "function hog(args, done) { const a = []; for (;;) a.push(new Array(1024).fill(a.length)); }",
            ),
            Bindings::new(),
            EntryPoints::new(["hog"]),
        )
        .await?;
    assert!(conn.call("hog", Arguments::new()).await.is_err());
    Ok(())
}
