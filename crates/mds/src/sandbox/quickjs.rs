//! QuickJS sandbox runtime.
//!
//! Each connection owns one QuickJS runtime and context, living on a
//! dedicated worker thread because QuickJS values are not `Send`. Calls are
//! queued over a channel and served one at a time.
//!
//! Entry points are called as `fn(args, callback)`: the result is whatever is
//! passed to `callback`, or else the function's return value. Returned
//! promises are driven through the QuickJS job queue.

use std::{sync::LazyLock, thread};

use regex::Regex;
use rquickjs::{Context, Ctx, Function, Object, Promise, Value as JsValue};
use serde_json::json;
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
};
use tracing::{debug, error, trace};

use super::{Arguments, Bindings, Connection, EntryPoints, LogicPayload, Runtime, Value};
use crate::{
    TRACE_TARGET_SCRIPT,
    config::Config,
    error::{Error, Result},
};

const INTERFACE_GLOBAL: &str = "__mds_interface";
const INVOKE_GLOBAL: &str = "__mds_invoke";
const HOSTCALL_GLOBAL: &str = "__mds_hostcall";

const PRELUDE: &str = r#"
globalThis.__mds_interface = {};
globalThis.__mds_invoke = function (fn, args) {
  return new Promise(function (resolve, reject) {
    try {
      const ret = fn(args, resolve);
      if (ret !== undefined) Promise.resolve(ret).then(resolve, reject);
    } catch (e) {
      reject(e);
    }
  });
};
globalThis.__mds_unwrap = function (raw) {
  const reply = JSON.parse(raw);
  if ("err" in reply) throw new Error(reply.err);
  return reply.ok;
};
"#;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("identifier pattern is valid")
});

/// QuickJS-backed [`Runtime`].
#[derive(Clone, Copy, Debug)]
pub struct QuickJs {
    max_memory: Option<usize>,
    max_stack_size: usize,
}

impl QuickJs {
    pub const DEFAULT_MAX_STACK_SIZE: usize = 2 * 1024 * 1024;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_memory: None,
            max_stack_size: Self::DEFAULT_MAX_STACK_SIZE,
        }
    }

    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            max_memory: config.sandbox_max_memory,
            max_stack_size: config.sandbox_max_stack,
        }
    }

    /// Memory hard limit per sandbox. `None` is unlimited.
    #[must_use]
    pub const fn max_memory(mut self, max_memory: Option<usize>) -> Self {
        self.max_memory = max_memory;
        self
    }

    #[must_use]
    pub const fn max_stack_size(mut self, max_stack_size: usize) -> Self {
        self.max_stack_size = max_stack_size;
        self
    }
}

impl Default for QuickJs {
    fn default() -> Self {
        Self::new()
    }
}

struct Request {
    entry_point: String,
    args: Arguments,
    reply: oneshot::Sender<Result<Value>>,
}

/// Connection to one QuickJS worker. Dropping it stops the worker.
pub struct QuickJsConnection {
    tx: mpsc::UnboundedSender<Request>,
}

#[async_trait::async_trait]
impl Runtime for QuickJs {
    type Connection = QuickJsConnection;

    async fn connect(
        &self,
        logic: LogicPayload,
        bindings: Bindings,
        entry_points: EntryPoints,
    ) -> Result<QuickJsConnection> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = Handle::current();
        let limits = *self;

        thread::Builder::new()
            .name("mds-quickjs".to_string())
            .spawn(move || {
                let scope = match Scope::new(limits, &logic, bindings, handle, &entry_points) {
                    Ok(scope) => {
                        let _ = ready_tx.send(Ok(()));
                        scope
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                serve(&scope, rx);
            })
            .map_err(|e| Error::Runtime(e.into()))?;

        ready_rx
            .await
            .map_err(|_| Error::runtime("sandbox worker exited during startup"))??;
        Ok(QuickJsConnection { tx })
    }
}

#[async_trait::async_trait]
impl Connection for QuickJsConnection {
    async fn call(&self, entry_point: &str, args: Arguments) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request {
                entry_point: entry_point.to_string(),
                args,
                reply,
            })
            .map_err(|_| Error::runtime("sandbox worker is gone"))?;
        rx.await
            .map_err(|_| Error::runtime("sandbox worker dropped the call"))?
    }
}

fn serve(scope: &Scope, mut rx: mpsc::UnboundedReceiver<Request>) {
    while let Some(req) = rx.blocking_recv() {
        trace!(target: TRACE_TARGET_SCRIPT, entry_point = %req.entry_point, "call");
        let result = scope.call(&req.entry_point, &req.args);
        if let Err(err) = &result {
            debug!(target: TRACE_TARGET_SCRIPT, entry_point = %req.entry_point, error = %err, "call failed");
        }
        let _ = req.reply.send(result);
    }
    trace!(target: TRACE_TARGET_SCRIPT, "sandbox worker stopped");
}

struct Scope {
    // Must outlive the context.
    _runtime: rquickjs::Runtime,
    context: Context,
}

impl Scope {
    fn new(
        limits: QuickJs,
        logic: &LogicPayload,
        bindings: Bindings,
        handle: Handle,
        entry_points: &EntryPoints,
    ) -> Result<Self> {
        let runtime = rquickjs::Runtime::new().map_err(Error::runtime)?;
        if let Some(max_memory) = limits.max_memory {
            runtime.set_memory_limit(max_memory);
        }
        runtime.set_max_stack_size(limits.max_stack_size);
        let context = Context::full(&runtime).map_err(Error::runtime)?;

        let scope = Self {
            _runtime: runtime,
            context,
        };
        scope.eval(PRELUDE)?;
        scope.install_bindings(bindings, handle)?;
        scope.eval(logic.as_str())?;
        scope.expose(entry_points)?;
        Ok(scope)
    }

    fn eval(&self, code: &str) -> Result<()> {
        self.context.with(|ctx| {
            ctx.eval::<(), _>(code)
                .map_err(|e| js_error(&ctx, e))
        })
    }

    /// Bindings become global functions. Arguments and results cross the
    /// boundary as JSON; a failed binding throws inside the guest.
    fn install_bindings(&self, bindings: Bindings, handle: Handle) -> Result<()> {
        let names: Vec<String> = bindings.names().map(str::to_string).collect();
        self.context.with(|ctx| {
            let hostcall = Function::new(ctx.clone(), move |name: String, payload: String| {
                hostcall(&bindings, &handle, &name, &payload)
            })
            .map_err(|e| js_error(&ctx, e))?;
            ctx.globals()
                .set(HOSTCALL_GLOBAL, hostcall)
                .map_err(|e| js_error(&ctx, e))
        })?;

        for name in names {
            let quoted = serde_json::to_string(&name)?;
            self.eval(&format!(
                "globalThis[{quoted}] = function (...args) {{ \
                     return __mds_unwrap({HOSTCALL_GLOBAL}({quoted}, JSON.stringify(args))); \
                 }};"
            ))?;
        }
        Ok(())
    }

    /// Resolve every entry point to a function and record it in the
    /// interface table. Lexical (`const`/`let`) declarations count.
    fn expose(&self, entry_points: &EntryPoints) -> Result<()> {
        for name in entry_points.iter() {
            let quoted = serde_json::to_string(name)?;
            let lookup = if IDENTIFIER.is_match(name) {
                format!("typeof {name} === \"function\" ? {name} : undefined")
            } else {
                format!("globalThis[{quoted}]")
            };
            self.context.with(|ctx| {
                let func: JsValue<'_> = ctx
                    .eval(lookup.as_str())
                    .map_err(|e| js_error(&ctx, e))?;
                if !func.is_function() {
                    return Err(Error::Guest {
                        message: format!("entry point `{name}` is not defined as a function"),
                    });
                }
                let iface: Object<'_> = ctx
                    .globals()
                    .get(INTERFACE_GLOBAL)
                    .map_err(|e| js_error(&ctx, e))?;
                iface.set(name, func).map_err(|e| js_error(&ctx, e))
            })?;
        }
        Ok(())
    }

    fn call(&self, entry_point: &str, args: &Arguments) -> Result<Value> {
        let args = serde_json::to_string(args)?;
        self.context.with(|ctx| {
            let globals = ctx.globals();
            let iface: Object<'_> = globals
                .get(INTERFACE_GLOBAL)
                .map_err(|e| js_error(&ctx, e))?;
            let func: Function<'_> = iface.get(entry_point).map_err(|_| Error::UnknownEntryPoint {
                name: entry_point.to_string(),
            })?;
            let invoke: Function<'_> = globals
                .get(INVOKE_GLOBAL)
                .map_err(|e| js_error(&ctx, e))?;
            let args = ctx.json_parse(args).map_err(|e| js_error(&ctx, e))?;

            let ret: JsValue<'_> = invoke
                .call((func, args))
                .map_err(|e| js_error(&ctx, e))?;
            let promise = ret
                .as_promise()
                .ok_or_else(|| Error::runtime("entry point wrapper did not return a promise"))?;
            let value = drive_promise(&ctx, promise, entry_point)?;

            let json = ctx
                .json_stringify(value)
                .map_err(|e| js_error(&ctx, e))?;
            match json {
                Some(json) => {
                    let json = json.to_string().map_err(|e| js_error(&ctx, e))?;
                    Ok(serde_json::from_str(&json)?)
                }
                // `undefined` and functions have no JSON form.
                None => Ok(Value::Null),
            }
        })
    }
}

/// Run queued jobs until `promise` settles. QuickJS has no external event
/// source here, so an empty job queue with a pending promise means the entry
/// point will never produce a result.
fn drive_promise<'js>(
    ctx: &Ctx<'js>,
    promise: &Promise<'js>,
    entry_point: &str,
) -> Result<JsValue<'js>> {
    loop {
        match promise.result::<JsValue<'js>>() {
            Some(Ok(value)) => return Ok(value),
            Some(Err(e)) => return Err(js_error(ctx, e)),
            None => {}
        }
        if !ctx.execute_pending_job() {
            return Err(Error::Guest {
                message: format!("entry point `{entry_point}` did not produce a result"),
            });
        }
    }
}

fn hostcall(bindings: &Bindings, handle: &Handle, name: &str, payload: &str) -> String {
    let outcome = serde_json::from_str::<Vec<Value>>(payload)
        .map_err(|e| e.to_string())
        .and_then(|args| {
            handle
                .block_on(bindings.call(name, args))
                .map_err(|e| e.to_string())
        });
    match outcome {
        Ok(value) => json!({ "ok": value }).to_string(),
        Err(err) => {
            error!(target: TRACE_TARGET_SCRIPT, binding = name, error = %err, "binding failed");
            json!({ "err": err }).to_string()
        }
    }
}

fn js_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> Error {
    if !matches!(err, rquickjs::Error::Exception) {
        return Error::runtime(err);
    }
    let caught = ctx.catch();
    let message = if let Some(exc) = caught.as_exception() {
        let message = exc.message().unwrap_or_default();
        match exc.stack() {
            Some(stack) if !stack.is_empty() => format!("{message}\n\n{stack}"),
            _ => message,
        }
    } else if let Some(s) = caught.as_string() {
        s.to_string().unwrap_or_default()
    } else {
        format!("{caught:?}")
    };
    Error::Guest { message }
}
