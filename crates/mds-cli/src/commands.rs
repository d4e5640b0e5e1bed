use std::path::Path;

use anyhow::{Context, Result};
use mds::{
    CommonMark, Config, DocumentOptions, MarkupRenderer, ScriptDocument, VariableType,
    binding::truthy,
    document::{render_markup, split_source},
    placeholder::extract,
    sandbox::{Value, quickjs::QuickJs},
    ui::{Element, HeadlessDocument, UiDocument},
};
use serde_json::json;
use tracing::{debug, info};

const ROOT: &str = "root";

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Print the descriptors of a document as JSON.
pub fn vars(path: &Path) -> Result<()> {
    let source = read(path)?;
    let markup = split_source(&source).map_or(source.as_str(), |(markup, _)| markup);
    let variables = extract(markup)?;
    println!("{}", serde_json::to_string_pretty(&variables)?);
    Ok(())
}

/// Print the static HTML of a document without starting a sandbox.
pub fn render(path: &Path) -> Result<()> {
    let source = read(path)?;
    let html = match split_source(&source) {
        Some((markup, _)) => render_markup(markup, &CommonMark)?.1,
        None => CommonMark.render(&source),
    };
    print!("{html}");
    Ok(())
}

/// `name=value` pair for an input widget.
pub fn parse_input(arg: &str) -> Result<(String, String)> {
    let (name, value) = arg
        .split_once('=')
        .with_context(|| format!("expected name=value, got `{arg}`"))?;
    Ok((name.to_string(), value.to_string()))
}

/// Load a document headlessly, fill in inputs, invoke `entry` and print the
/// resulting widget state.
pub async fn run(
    path: &Path,
    entry: &str,
    inputs: Vec<(String, String)>,
    config: &Config,
) -> Result<()> {
    let source = read(path)?;
    let ui = HeadlessDocument::new().with_container(ROOT);
    let doc = ScriptDocument::create(
        ROOT,
        &source,
        ui.clone(),
        QuickJs::from_config(config),
        DocumentOptions::from_config(config),
    )
    .await
    .with_context(|| format!("failed to load {}", path.display()))?;

    for (name, value) in inputs {
        let desc = doc
            .variables()
            .get(&name)
            .with_context(|| format!("no variable named `{name}`"))?;
        anyhow::ensure!(desc.ty.is_input(), "`{name}` is a {} widget, not an input", desc.ty);
        let el = ui
            .element_by_id(&desc.element_id)
            .with_context(|| format!("widget `{name}` is not mounted"))?;
        if desc.ty == VariableType::Checkbox {
            let parsed = serde_json::from_str(&value).unwrap_or(Value::String(value));
            el.set_checked(truthy(&parsed));
        } else {
            el.set_value(&value);
        }
        debug!(%name, "input set");
    }

    doc.when_ready().await?;
    let report = doc.trigger(entry).await?;
    info!(entry, written = report.written.len(), "invocation finished");

    let mut widgets = ui.snapshot();
    widgets.remove(ROOT);
    let out = json!({ "report": report, "widgets": widgets });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
