use anyhow::{Result, bail};
use mds::{
    Arguments, Bindings, EntryPoints, LogicPayload,
    sandbox::{
        Runtime, Value,
        quickjs::{QuickJs, QuickJsConnection},
    },
};

pub async fn connect(logic: &str, entry_points: &[&str]) -> mds::Result<QuickJsConnection> {
    connect_with(logic, entry_points, Bindings::new()).await
}

pub async fn connect_with(
    logic: &str,
    entry_points: &[&str],
    bindings: Bindings,
) -> mds::Result<QuickJsConnection> {
    QuickJs::new()
        .connect(
            LogicPayload::new(logic),
            bindings,
            EntryPoints::new(entry_points.iter().copied()),
        )
        .await
}

/// Arguments from a JSON object literal.
pub fn args(value: Value) -> Result<Arguments> {
    match value {
        Value::Object(map) => Ok(map),
        other => bail!("arguments must be an object, got {other}"),
    }
}

pub fn guest_message(err: &mds::Error) -> Result<&str> {
    match err {
        mds::Error::Guest { message } => Ok(message),
        other => bail!("expected guest error, got {other:?}"),
    }
}
