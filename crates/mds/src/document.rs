//! Document script controller.
//!
//! [`ScriptDocument::create`] takes a document source, installs its rendered
//! markup into a target element and wires every `run` widget to the sandbox.
//! A source is split at the first `{{{{`: markup before it, logic after it.
//! Without a separator the whole source is plain markdown and no sandbox is
//! started.

use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Weak},
};

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    TRACE_TARGET_SCRIPT,
    binding::{DispatchReport, collect_arguments, dispatch_output},
    config::Config,
    error::{Error, Result},
    markup::{CommonMark, MarkupRenderer},
    placeholder::{self, Variables},
    sandbox::{Bindings, EntryPoints, LogicPayload, Runtime, SandboxSession},
    ui::{Element, Listener, UiDocument},
};

pub const SEPARATOR: &str = "{{{{";
const TRAILER: &str = "}}}}";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Source split. Plain markdown documents stay here.
    Parsed,
    /// Widgets mounted and `run` buttons wired.
    Rendered,
    /// At least one entry point call is running.
    Invoking,
}

#[derive(Clone)]
pub struct DocumentOptions {
    /// Let `outraw` widgets receive unrendered HTML. Off by default.
    pub allow_raw_output: bool,
    pub bindings: Bindings,
    pub renderer: Arc<dyn MarkupRenderer>,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            allow_raw_output: false,
            bindings: Bindings::new(),
            renderer: Arc::new(CommonMark),
        }
    }
}

impl DocumentOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            allow_raw_output: config.allow_raw_output,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn allow_raw_output(mut self, allow: bool) -> Self {
        self.allow_raw_output = allow;
        self
    }

    #[must_use]
    pub fn bindings(mut self, bindings: Bindings) -> Self {
        self.bindings = bindings;
        self
    }

    #[must_use]
    pub fn renderer(mut self, renderer: impl MarkupRenderer) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }
}

impl fmt::Debug for DocumentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentOptions")
            .field("allow_raw_output", &self.allow_raw_output)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

/// Split a source into markup and logic. The logic may end with `}}}}`,
/// which is dropped.
#[must_use]
pub fn split_source(source: &str) -> Option<(&str, &str)> {
    let (markup, logic) = source.split_once(SEPARATOR)?;
    let trimmed = logic.trim_end();
    let logic = trimmed.strip_suffix(TRAILER).unwrap_or(logic);
    Some((markup, logic))
}

/// Render `markup` to static HTML with widget fragments in place of the
/// placeholders.
///
/// # Errors
/// Parse errors from [`placeholder::extract`].
pub fn render_markup(markup: &str, renderer: &dyn MarkupRenderer) -> Result<(Variables, String)> {
    let variables = placeholder::extract(markup)?;
    let html = placeholder::substitute(&renderer.render(markup), variables.fragments());
    Ok((variables, html))
}

struct Inner<D: UiDocument> {
    ui: D,
    variables: Variables,
    session: Option<SandboxSession>,
    renderer: Arc<dyn MarkupRenderer>,
    allow_raw_output: bool,
    phase: Mutex<Phase>,
    in_flight: Mutex<HashSet<String>>,
}

impl<D: UiDocument> Inner<D> {
    fn set_phase(&self, phase: Phase) {
        *self.phase.lock() = phase;
        debug!(?phase, "document phase");
    }
}

/// A loaded document. Cloning yields another handle to the same document.
pub struct ScriptDocument<D: UiDocument> {
    inner: Arc<Inner<D>>,
}

impl<D: UiDocument> Clone for ScriptDocument<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: UiDocument> ScriptDocument<D> {
    /// Load `source` into the element `target` of `ui`.
    ///
    /// Waits for `ui` to become interactive first. The sandbox connects in
    /// the background; clicks that arrive before it is ready wait for it.
    ///
    /// # Errors
    /// Parse errors ([`Error::DuplicateVariable`],
    /// [`Error::MalformedPlaceholder`]) and [`Error::MissingElement`] for an
    /// absent target. The target is left untouched on error.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub async fn create<R: Runtime>(
        target: &str,
        source: &str,
        ui: D,
        runtime: R,
        options: DocumentOptions,
    ) -> Result<Self> {
        ui.when_interactive().await;

        let DocumentOptions {
            allow_raw_output,
            bindings,
            renderer,
        } = options;
        let mount = |ui: &D| {
            ui.element_by_id(target).ok_or_else(|| Error::MissingElement {
                id: target.to_string(),
            })
        };

        let Some((markup, logic)) = split_source(source) else {
            let container = mount(&ui)?;
            container.set_inner_html(&renderer.render(source));
            info!(mount = target, "rendered plain markdown document");
            return Ok(Self::assemble(
                ui,
                Variables::default(),
                None,
                renderer,
                allow_raw_output,
            ));
        };

        let (variables, html) = render_markup(markup, renderer.as_ref())?;
        let container = mount(&ui)?;
        debug!(mount = target, variables = variables.len(), "parsed document");

        let entry_points = EntryPoints::new(variables.entry_points());
        let session =
            SandboxSession::start(runtime, LogicPayload::new(logic), bindings, entry_points);

        container.set_inner_html(&html);
        let doc = Self::assemble(ui, variables, Some(session), renderer, allow_raw_output);
        doc.attach_listeners();
        doc.inner.set_phase(Phase::Rendered);
        info!(
            mount = target,
            variables = doc.inner.variables.len(),
            entry_points = doc.inner.variables.entry_points().len(),
            "rendered script document"
        );
        Ok(doc)
    }

    fn assemble(
        ui: D,
        variables: Variables,
        session: Option<SandboxSession>,
        renderer: Arc<dyn MarkupRenderer>,
        allow_raw_output: bool,
    ) -> Self {
        let inner = Inner {
            ui,
            variables,
            session,
            renderer,
            allow_raw_output,
            phase: Mutex::new(Phase::Parsed),
            in_flight: Mutex::new(HashSet::new()),
        };
        debug!(phase = ?Phase::Parsed, "document phase");
        Self {
            inner: Arc::new(inner),
        }
    }

    fn attach_listeners(&self) {
        for name in self.inner.variables.entry_points() {
            let Some(desc) = self.inner.variables.get(&name) else {
                continue;
            };
            let Some(button) = self.inner.ui.element_by_id(&desc.element_id) else {
                warn!(%name, "run widget missing after render");
                continue;
            };
            let weak: Weak<Inner<D>> = Arc::downgrade(&self.inner);
            let listener: Listener = Arc::new(move || {
                let weak = weak.clone();
                let name = name.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let doc = ScriptDocument { inner };
                    if let Err(err) = doc.trigger(&name).await {
                        warn!(target: TRACE_TARGET_SCRIPT, entry_point = %name, error = %err, "invocation failed");
                    }
                }
                .boxed()
            });
            button.add_event_listener("click", listener);
        }
    }

    /// Invoke entry point `name` as a click on its `run` widget would:
    /// collect arguments, wait for the sandbox, call, dispatch the result.
    ///
    /// # Errors
    /// [`Error::UnknownEntryPoint`] when `name` is not a `run` widget,
    /// [`Error::InvocationInFlight`] when the previous call of `name` has not
    /// returned, and any collection or sandbox error.
    pub async fn trigger(&self, name: &str) -> Result<DispatchReport> {
        let inner = &self.inner;
        let session = inner
            .session
            .as_ref()
            .filter(|s| s.entry_points().contains(name))
            .ok_or_else(|| Error::UnknownEntryPoint {
                name: name.to_string(),
            })?;

        let _busy = Busy::acquire(inner, name)?;
        let span = info_span!(target: TRACE_TARGET_SCRIPT, "document.trigger", entry_point = name);
        async {
            let args = collect_arguments(&inner.variables, &inner.ui)?;
            let result = session.invoke_when_ready(name, args).await?;
            let report = dispatch_output(
                result,
                &inner.variables,
                &inner.ui,
                inner.renderer.as_ref(),
                inner.allow_raw_output,
            );
            debug!(written = ?report.written, skipped = report.skipped.len(), "dispatched output");
            Ok(report)
        }
        .instrument(span)
        .await
    }

    #[must_use]
    pub fn variables(&self) -> &Variables {
        &self.inner.variables
    }

    /// `None` for plain markdown documents.
    #[must_use]
    pub fn session(&self) -> Option<&SandboxSession> {
        self.inner.session.as_ref()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.inner.phase.lock()
    }

    #[must_use]
    pub fn ui(&self) -> &D {
        &self.inner.ui
    }

    /// Wait for the sandbox. Plain markdown documents are always ready.
    ///
    /// # Errors
    /// [`Error::SandboxFailed`] when the sandbox could not start.
    pub async fn when_ready(&self) -> Result<()> {
        match &self.inner.session {
            Some(session) => session.when_ready().await,
            None => Ok(()),
        }
    }
}

impl<D: UiDocument> fmt::Debug for ScriptDocument<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptDocument")
            .field("phase", &self.phase())
            .field("variables", &self.inner.variables.len())
            .field("session", &self.inner.session)
            .finish_non_exhaustive()
    }
}

/// Marks an entry point as running and disables its button until dropped.
struct Busy<'a, D: UiDocument> {
    inner: &'a Inner<D>,
    name: String,
    button: Option<D::Element>,
}

impl<'a, D: UiDocument> Busy<'a, D> {
    fn acquire(inner: &'a Inner<D>, name: &str) -> Result<Self> {
        {
            let mut in_flight = inner.in_flight.lock();
            if !in_flight.insert(name.to_string()) {
                return Err(Error::InvocationInFlight {
                    name: name.to_string(),
                });
            }
        }
        inner.set_phase(Phase::Invoking);

        let button = inner
            .variables
            .get(name)
            .and_then(|desc| inner.ui.element_by_id(&desc.element_id));
        if let Some(button) = &button {
            button.set_disabled(true);
        }
        Ok(Self {
            inner,
            name: name.to_string(),
            button,
        })
    }
}

impl<D: UiDocument> Drop for Busy<'_, D> {
    fn drop(&mut self) {
        if let Some(button) = &self.button {
            button.set_disabled(false);
        }
        let idle = {
            let mut in_flight = self.inner.in_flight.lock();
            in_flight.remove(&self.name);
            in_flight.is_empty()
        };
        if idle {
            self.inner.set_phase(Phase::Rendered);
        }
    }
}
