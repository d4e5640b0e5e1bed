use anyhow::{Context, Result};
use mds::{
    Bindings, Config, DocumentOptions, ScriptDocument,
    sandbox::{Value, quickjs::QuickJs},
    ui::{Element, HeadlessDocument, UiDocument},
};
use serde_json::json;

const SIMPLE: &str = "\
{{run:go:Go}} {{outmd:result}}
{{{{
function go(args, done) { done({ result: 'hi **there**' }); }
}}}}
";

const GREETER: &str = "\
Name: {{shorttext:name:World}} Loud: {{checkbox:loud:0}}

{{run:greet:Greet}}

{{outmd:output}} {{shorttext:stamped}} {{outraw:raw}}
{{{{
function greet(args, done) {
  let s = 'Hello ' + args.name;
  if (args.loud) s = s.toUpperCase();
  done({ output: '*' + s + '*', stamped: stamp(s), raw: '<i>' + s + '</i>' });
}
}}}}
";

fn page() -> HeadlessDocument {
    HeadlessDocument::new().with_container("root")
}

fn element(ui: &HeadlessDocument, id: &str) -> Result<mds::ui::headless::HeadlessElement> {
    ui.element_by_id(id)
        .with_context(|| format!("missing element `{id}`"))
}

#[tokio::test]
async fn click_renders_markdown_result() -> Result<()> {
    let ui = page();
    let doc = ScriptDocument::create(
        "root",
        SIMPLE,
        ui.clone(),
        QuickJs::new(),
        DocumentOptions::default(),
    )
    .await?;
    doc.when_ready().await?;

    ui.click("mds-go").await?;
    assert_eq!(
        element(&ui, "mds-result")?.inner_html(),
        "<p>hi <strong>there</strong></p>\n"
    );
    let last = doc
        .session()
        .and_then(mds::SandboxSession::last_result)
        .context("expected a recorded call")?;
    assert_eq!(last.entry_point, "go");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn inputs_bindings_and_outputs_round_trip() -> Result<()> {
    let bindings = Bindings::new().bind_sync("stamp", |args| {
        let s = args.first().and_then(Value::as_str).unwrap_or_default();
        Ok(json!(format!("[{s}]")))
    });
    let config = Config::from_lookup(|key| (key == "MDS_ALLOW_RAW_OUTPUT").then(|| "1".to_string()));
    let ui = page();
    let doc = ScriptDocument::create(
        "root",
        GREETER,
        ui.clone(),
        QuickJs::from_config(&config),
        DocumentOptions::from_config(&config).bindings(bindings),
    )
    .await?;

    element(&ui, "mds-name")?.set_value("Rust");
    element(&ui, "mds-loud")?.set_checked(true);
    let report = doc.trigger("greet").await?;
    assert_eq!(report.written, ["output", "raw", "stamped"]);

    assert_eq!(
        element(&ui, "mds-output")?.inner_html(),
        "<p><em>HELLO RUST</em></p>\n"
    );
    assert_eq!(element(&ui, "mds-stamped")?.value(), "[HELLO RUST]");
    assert_eq!(element(&ui, "mds-raw")?.inner_html(), "<i>HELLO RUST</i>");
    Ok(())
}

#[tokio::test]
async fn missing_entry_point_fails_the_session() -> Result<()> {
    let ui = page();
    let doc = ScriptDocument::create(
        "root",
        "{{run:go}} {{outmd:output}}\n{{{{\nfunction other() {}\n",
        ui.clone(),
        QuickJs::new(),
        DocumentOptions::default(),
    )
    .await?;

    let err = doc.when_ready().await.expect_err("entry point is missing");
    assert!(matches!(err, mds::Error::SandboxFailed { .. }));
    assert!(matches!(
        doc.trigger("go").await,
        Err(mds::Error::SandboxFailed { .. })
    ));
    assert_eq!(element(&ui, "mds-output")?.inner_html(), "");
    Ok(())
}
