//! Moving values between widgets and the sandbox.
//!
//! [`collect_arguments`] reads input widgets into call arguments right before
//! an invocation; [`dispatch_output`] writes a call result back into the
//! widgets named by its keys.

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    markup::MarkupRenderer,
    placeholder::Variables,
    sandbox::{Arguments, Value},
    ui::{Element, UiDocument},
    variable::VariableType,
};

/// Key a non-object result is wrapped under.
pub const DEFAULT_OUTPUT_KEY: &str = "output";

/// Read the live value of every input widget.
///
/// Text, textarea and select widgets contribute their string value,
/// checkboxes their checked state. Other widgets are not arguments.
///
/// # Errors
/// [`Error::MissingElement`] when an input widget is not in the document.
pub fn collect_arguments<D: UiDocument>(variables: &Variables, ui: &D) -> Result<Arguments> {
    let mut args = Arguments::new();
    for (name, desc) in variables {
        if !desc.ty.is_input() {
            continue;
        }
        let el = ui
            .element_by_id(&desc.element_id)
            .ok_or_else(|| Error::MissingElement {
                id: desc.element_id.clone(),
            })?;
        let value = match desc.ty {
            VariableType::Checkbox => Value::Bool(el.checked()),
            _ => Value::String(el.value()),
        };
        args.insert(name.clone(), value);
    }
    Ok(args)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No placeholder has this name.
    UnknownName,
    /// `outraw` target while raw output is disabled.
    RawOutputDisabled,
    /// `run` and unknown widgets do not take values.
    NotWritable,
    MissingElement,
}

/// Outcome of one [`dispatch_output`] pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub written: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl DispatchReport {
    #[must_use]
    pub fn is_written(&self, name: &str) -> bool {
        self.written.iter().any(|n| n == name)
    }

    #[must_use]
    pub fn skip_reason(&self, name: &str) -> Option<SkipReason> {
        self.skipped
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, reason)| *reason)
    }
}

/// Write `result` into the widgets named by its keys.
///
/// A result that is not an object is treated as `{ "output": result }`,
/// except `null`, which writes nothing.
/// Widgets whose names are absent from the result keep their state, and a
/// failure on one widget does not stop the others.
pub fn dispatch_output<D: UiDocument>(
    result: Value,
    variables: &Variables,
    ui: &D,
    renderer: &dyn MarkupRenderer,
    allow_raw_output: bool,
) -> DispatchReport {
    let fields = match result {
        Value::Object(fields) => fields,
        // `done()` and `done(undefined)` leave every widget alone.
        Value::Null => Arguments::new(),
        other => {
            let mut fields = Arguments::new();
            fields.insert(DEFAULT_OUTPUT_KEY.to_string(), other);
            fields
        }
    };

    let mut report = DispatchReport::default();
    for (name, value) in fields {
        match write_one(&name, &value, variables, ui, renderer, allow_raw_output) {
            Ok(()) => report.written.push(name),
            Err(reason) => {
                match reason {
                    SkipReason::MissingElement => {
                        warn!(%name, "output target is missing from the document");
                    }
                    _ => debug!(%name, ?reason, "output skipped"),
                }
                report.skipped.push((name, reason));
            }
        }
    }
    report
}

fn write_one<D: UiDocument>(
    name: &str,
    value: &Value,
    variables: &Variables,
    ui: &D,
    renderer: &dyn MarkupRenderer,
    allow_raw_output: bool,
) -> Result<(), SkipReason> {
    let desc = variables.get(name).ok_or(SkipReason::UnknownName)?;
    match desc.ty {
        VariableType::Run | VariableType::Unknown(_) => return Err(SkipReason::NotWritable),
        VariableType::OutRaw if !allow_raw_output => return Err(SkipReason::RawOutputDisabled),
        _ => {}
    }
    let el = ui
        .element_by_id(&desc.element_id)
        .ok_or(SkipReason::MissingElement)?;
    match desc.ty {
        VariableType::OutRaw => el.set_inner_html(&display(value)),
        VariableType::OutMd => el.set_inner_html(&renderer.render(&display(value))),
        VariableType::Checkbox => el.set_checked(truthy(value)),
        _ => el.set_value(&display(value)),
    }
    Ok(())
}

/// Text form of a value: strings as-is, everything else as compact JSON.
#[must_use]
pub fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JavaScript truthiness.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
