//! Sandbox bridge.
//!
//! A [`Runtime`] turns a document's logic section into a live
//! [`Connection`]. [`SandboxSession`] wraps that connection with the
//! `Constructed → Connecting → Ready` lifecycle: it starts connecting in the
//! background, lets any number of callers wait for readiness, and refuses
//! calls that arrive before it.

#[cfg(feature = "quickjs")]
pub mod quickjs;

use std::{
    collections::BTreeMap,
    fmt,
    future::Future,
    sync::{Arc, OnceLock},
};

use futures::{FutureExt, future::BoxFuture};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    TRACE_TARGET_SCRIPT,
    error::{BoxError, Error, Result},
};

pub type Value = serde_json::Value;

/// Named call arguments, one entry per input widget.
pub type Arguments = serde_json::Map<String, Value>;

/// Logic section of a document, handed to the runtime verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogicPayload(String);

impl LogicPayload {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LogicPayload {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Entry points the runtime must expose to the host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EntryPoints(Vec<String>);

impl EntryPoints {
    #[must_use]
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if !out.contains(&name) {
                out.push(name);
            }
        }
        Self(out)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub type BindingFn =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, core::result::Result<Value, BoxError>> + Send + Sync>;

/// Host functions reachable from inside the sandbox, keyed by name.
#[derive(Clone, Default)]
pub struct Bindings(BTreeMap<String, BindingFn>);

impl Bindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async host function. A later binding with the same name
    /// replaces the earlier one.
    #[must_use]
    pub fn bind<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = core::result::Result<Value, BoxError>> + Send + 'static,
    {
        self.0.insert(name.into(), Arc::new(move |args| f(args).boxed()));
        self
    }

    /// Register a synchronous host function.
    #[must_use]
    pub fn bind_sync<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> core::result::Result<Value, BoxError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.bind(name, move |args| {
            let f = Arc::clone(&f);
            async move { f(args) }
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Call binding `name`.
    ///
    /// # Errors
    /// [`Error::Host`] when the binding does not exist or fails.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let binding = self
            .0
            .get(name)
            .ok_or_else(|| Error::Host(format!("no binding named `{name}`").into()))?;
        binding(args).await.map_err(Error::Host)
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

/// Execution runtime for logic payloads.
#[async_trait::async_trait]
pub trait Runtime: Send + Sync + 'static {
    type Connection: Connection;

    /// Start a sandbox for `logic`, exposing `entry_points` to the host and
    /// `bindings` to the guest. Resolves once the sandbox accepts calls.
    async fn connect(
        &self,
        logic: LogicPayload,
        bindings: Bindings,
        entry_points: EntryPoints,
    ) -> Result<Self::Connection>;
}

/// Live sandbox. Every call yields exactly one result.
#[async_trait::async_trait]
pub trait Connection: Send + Sync + 'static {
    async fn call(&self, entry_point: &str, args: Arguments) -> Result<Value>;
}

#[async_trait::async_trait]
impl<R: Runtime> Runtime for Arc<R> {
    type Connection = R::Connection;

    async fn connect(
        &self,
        logic: LogicPayload,
        bindings: Bindings,
        entry_points: EntryPoints,
    ) -> Result<Self::Connection> {
        (**self).connect(logic, bindings, entry_points).await
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum SessionState {
    Constructed,
    Connecting,
    Ready,
    Failed(String),
}

impl SessionState {
    const fn is_settled(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed(_))
    }
}

/// Most recent completed call of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CallRecord {
    pub entry_point: String,
    pub value: Value,
}

struct SessionInner {
    entry_points: EntryPoints,
    state: watch::Sender<SessionState>,
    connection: OnceLock<Arc<dyn Connection>>,
    last_result: Mutex<Option<CallRecord>>,
}

/// One sandbox per document instance. Cloning yields another handle to the
/// same session.
#[derive(Clone)]
pub struct SandboxSession {
    inner: Arc<SessionInner>,
}

impl SandboxSession {
    fn constructed(entry_points: EntryPoints) -> Self {
        let (state, _) = watch::channel(SessionState::Constructed);
        Self {
            inner: Arc::new(SessionInner {
                entry_points,
                state,
                connection: OnceLock::new(),
                last_result: Mutex::new(None),
            }),
        }
    }

    /// Create a session and start connecting it on the current tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn start<R: Runtime>(
        runtime: R,
        logic: LogicPayload,
        bindings: Bindings,
        entry_points: EntryPoints,
    ) -> Self {
        let session = Self::constructed(entry_points.clone());
        session.inner.state.send_replace(SessionState::Connecting);
        debug!(target: TRACE_TARGET_SCRIPT, entry_points = ?entry_points, "sandbox connecting");

        let inner = Arc::clone(&session.inner);
        let span = info_span!(target: TRACE_TARGET_SCRIPT, "sandbox.connect");
        tokio::spawn(
            async move {
                match runtime.connect(logic, bindings, entry_points).await {
                    Ok(connection) => {
                        let _ = inner.connection.set(Arc::new(connection));
                        inner.state.send_replace(SessionState::Ready);
                        info!(target: TRACE_TARGET_SCRIPT, "sandbox ready");
                    }
                    Err(err) => {
                        warn!(target: TRACE_TARGET_SCRIPT, error = %err, "sandbox failed to start");
                        inner.state.send_replace(SessionState::Failed(err.to_string()));
                    }
                }
            }
            .instrument(span),
        );
        session
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.inner.state.borrow() == SessionState::Ready
    }

    #[must_use]
    pub fn entry_points(&self) -> &EntryPoints {
        &self.inner.entry_points
    }

    #[must_use]
    pub fn last_result(&self) -> Option<CallRecord> {
        self.inner.last_result.lock().clone()
    }

    /// Wait for the ready transition. Every waiter is released by the same
    /// transition; once settled this returns immediately.
    ///
    /// # Errors
    /// [`Error::SandboxFailed`] when the sandbox could not start.
    pub async fn when_ready(&self) -> Result<()> {
        let mut rx = self.inner.state.subscribe();
        let state = rx
            .wait_for(SessionState::is_settled)
            .await
            .map_err(|_| Error::runtime("sandbox session dropped"))?;
        if let SessionState::Failed(message) = &*state {
            return Err(Error::SandboxFailed {
                message: message.clone(),
            });
        }
        Ok(())
    }

    /// Call `entry_point`. Does not wait for readiness.
    ///
    /// # Errors
    /// [`Error::SandboxNotReady`] before the ready transition,
    /// [`Error::SandboxFailed`] after a failed start,
    /// [`Error::UnknownEntryPoint`] for names that were not exposed, or
    /// whatever the call itself fails with.
    pub async fn invoke(&self, entry_point: &str, args: Arguments) -> Result<Value> {
        if !self.inner.entry_points.contains(entry_point) {
            return Err(Error::UnknownEntryPoint {
                name: entry_point.to_string(),
            });
        }
        let Some(connection) = self.inner.connection.get().cloned() else {
            return Err(match self.state() {
                SessionState::Failed(message) => Error::SandboxFailed { message },
                _ => Error::SandboxNotReady,
            });
        };

        let span = info_span!(target: TRACE_TARGET_SCRIPT, "sandbox.call", entry_point);
        let value = connection.call(entry_point, args).instrument(span).await?;
        *self.inner.last_result.lock() = Some(CallRecord {
            entry_point: entry_point.to_string(),
            value: value.clone(),
        });
        Ok(value)
    }

    /// Wait for readiness, then call `entry_point`.
    ///
    /// # Errors
    /// See [`Self::when_ready`] and [`Self::invoke`].
    pub async fn invoke_when_ready(&self, entry_point: &str, args: Arguments) -> Result<Value> {
        self.when_ready().await?;
        self.invoke(entry_point, args).await
    }
}

impl fmt::Debug for SandboxSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxSession")
            .field("state", &self.state())
            .field("entry_points", &self.inner.entry_points)
            .finish_non_exhaustive()
    }
}
