use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use mds::{
    Arguments, Bindings, EntryPoints, Error, LogicPayload,
    sandbox::{Connection, Runtime, Value},
};
use parking_lot::Mutex;
use tokio::sync::watch;

type Handler = Box<dyn Fn(&str, &Arguments) -> mds::Result<Value> + Send + Sync>;

struct State {
    handler: Handler,
    fail_connect: bool,
    ready: watch::Sender<bool>,
    calls_open: watch::Sender<bool>,
    connects: AtomicUsize,
    calls: Mutex<Vec<(String, Arguments)>>,
}

/// Runtime whose entry points are answered by a Rust closure. Connecting and
/// calling can each be held back to exercise readiness and overlap.
#[derive(Clone)]
pub struct ScriptedRuntime(Arc<State>);

impl ScriptedRuntime {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &Arguments) -> mds::Result<Value> + Send + Sync + 'static,
    {
        Self::build(Box::new(handler), true, false)
    }

    /// Stays in `Connecting` until [`Self::open`].
    pub fn gated<F>(handler: F) -> Self
    where
        F: Fn(&str, &Arguments) -> mds::Result<Value> + Send + Sync + 'static,
    {
        Self::build(Box::new(handler), false, false)
    }

    pub fn failing() -> Self {
        Self::build(Box::new(|_, _| Ok(Value::Null)), true, true)
    }

    fn build(handler: Handler, ready: bool, fail_connect: bool) -> Self {
        Self(Arc::new(State {
            handler,
            fail_connect,
            ready: watch::channel(ready).0,
            calls_open: watch::channel(true).0,
            connects: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }))
    }

    pub fn open(&self) {
        self.0.ready.send_replace(true);
    }

    pub fn hold_calls(&self) {
        self.0.calls_open.send_replace(false);
    }

    pub fn release_calls(&self) {
        self.0.calls_open.send_replace(true);
    }

    pub fn connects(&self) -> usize {
        self.0.connects.load(Ordering::SeqCst)
    }

    /// Calls that reached the sandbox, including held ones.
    pub fn calls(&self) -> Vec<(String, Arguments)> {
        self.0.calls.lock().clone()
    }
}

pub struct ScriptedConnection(Arc<State>);

#[async_trait]
impl Runtime for ScriptedRuntime {
    type Connection = ScriptedConnection;

    async fn connect(
        &self,
        _logic: LogicPayload,
        _bindings: Bindings,
        _entry_points: EntryPoints,
    ) -> mds::Result<ScriptedConnection> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        let _ = self.0.ready.subscribe().wait_for(|open| *open).await;
        if self.0.fail_connect {
            return Err(Error::Guest {
                message: "logic failed to load".into(),
            });
        }
        Ok(ScriptedConnection(Arc::clone(&self.0)))
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn call(&self, entry_point: &str, args: Arguments) -> mds::Result<Value> {
        self.0
            .calls
            .lock()
            .push((entry_point.to_string(), args.clone()));
        let _ = self.0.calls_open.subscribe().wait_for(|open| *open).await;
        (self.0.handler)(entry_point, &args)
    }
}

/// Poll `cond` until it holds, failing after a few seconds.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) -> Result<()> {
    for _ in 0..1000 {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bail!("timed out waiting for {what}")
}
