//! Inbound RPC command handling.
//!
//! ThingsBoard delivers server-side RPC as JSON `{"method": ..., "params": ...}`
//! on `v1/devices/me/rpc/request/+`. The MQTT event loop forwards raw payloads
//! into a bounded channel; this module decodes them and applies the result to
//! the shared control state, sending actuator tokens through the serial writer
//! channel.
//!
//! A manual `hose_on`/`hose_off` always disables auto mode; only an explicit
//! `set_auto` re-enables it.

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::control::{HoseCommand, SharedControl};

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RpcRequest {
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcCommand {
    HoseOn,
    HoseOff,
    SetAuto(bool),
    Unknown(String),
}

/// Decode a raw RPC payload into a command.
///
/// Malformed JSON (or JSON without a string `method`) is an error the caller
/// logs and drops; an unrecognized method decodes fine as `Unknown` so it can
/// be reported with its name.
pub fn decode(payload: &[u8]) -> Result<RpcCommand, serde_json::Error> {
    let request: RpcRequest = serde_json::from_slice(payload)?;
    let command = match request.method.as_str() {
        "hose_on" => RpcCommand::HoseOn,
        "hose_off" => RpcCommand::HoseOff,
        "set_auto" => RpcCommand::SetAuto(truthy(&request.params)),
        _ => RpcCommand::Unknown(request.method),
    };
    Ok(command)
}

/// Loose boolean coercion for `set_auto` params. The widget side sends a JSON
/// bool, but older dashboards send 0/1 or "true"/"" — treat them all the way
/// a truthiness check would.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Consume raw RPC payloads until the channel closes. Intended to be
/// `tokio::spawn`-ed from main.
pub async fn run(
    mut requests: mpsc::Receiver<Vec<u8>>,
    control: SharedControl,
    commands: mpsc::Sender<HoseCommand>,
) {
    while let Some(payload) = requests.recv().await {
        match decode(&payload) {
            Ok(command) => apply(command, &control, &commands).await,
            Err(e) => warn!(error = %e, "bad rpc payload, dropping"),
        }
    }
}

/// Apply one decoded command. State mutation and the actuator token send
/// happen under a single write-lock acquisition so they cannot interleave
/// with an auto-hysteresis decision.
pub async fn apply(
    command: RpcCommand,
    control: &SharedControl,
    commands: &mpsc::Sender<HoseCommand>,
) {
    match command {
        RpcCommand::HoseOn => manual_hose(true, control, commands).await,
        RpcCommand::HoseOff => manual_hose(false, control, commands).await,
        RpcCommand::SetAuto(enabled) => {
            let mut st = control.write().await;
            st.set_auto(enabled);
            info!(enabled, "rpc: auto mode set");
        }
        RpcCommand::Unknown(method) => {
            warn!(%method, "rpc: unknown method, ignoring");
        }
    }
}

async fn manual_hose(on: bool, control: &SharedControl, commands: &mpsc::Sender<HoseCommand>) {
    let mut st = control.write().await;
    st.set_hose(on);
    st.set_auto(false);

    let cmd = if on { HoseCommand::On } else { HoseCommand::Off };
    if commands.send(cmd).await.is_err() {
        warn!(?cmd, "serial writer gone, actuator command dropped");
    }
    info!(on, "rpc: manual hose override (auto disabled)");
}

// ===========================================================================
// Tests
// ===========================================================================
