mod bridge;
mod config;
mod control;
mod line;
mod rpc;
mod serial;

use anyhow::{bail, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bridge::Telemetry;
use control::HoseCommand;

/// ThingsBoard device telemetry topic.
const TELEMETRY_TOPIC: &str = "v1/devices/me/telemetry";
/// Wildcard over server-side RPC request IDs.
const RPC_REQUEST_TOPIC: &str = "v1/devices/me/rpc/request/+";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    info!(
        config = %config_path,
        dry_on = cfg.dry_on_level,
        wet_off = cfg.wet_off_level,
        auto = cfg.auto_enabled_default,
        "config loaded"
    );

    // ── Shared control state + channels ─────────────────────────────
    let control = control::shared(cfg.auto_enabled_default);

    let (line_tx, line_rx) = mpsc::channel::<String>(32);
    let (cmd_tx, cmd_rx) = mpsc::channel::<HoseCommand>(8);
    let (tele_tx, mut tele_rx) = mpsc::channel::<Telemetry>(32);
    let (rpc_tx, rpc_rx) = mpsc::channel::<Vec<u8>>(16);

    // ── Serial (or simulator) ───────────────────────────────────────
    serial::start(&cfg, line_tx, cmd_rx)?;

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new("soil-bridge", &cfg.mqtt_host, cfg.mqtt_port);
    mqttoptions.set_credentials(&cfg.access_token, "");
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);
    client.subscribe(RPC_REQUEST_TOPIC, QoS::AtLeastOnce).await?;
    info!(host = %cfg.mqtt_host, port = cfg.mqtt_port, "mqtt configured, subscribing to rpc");

    // Event loop task: forwards inbound RPC payloads to the dispatcher and
    // rides out connection loss — rumqttc reconnects on the next poll, we
    // just back off in between. Telemetry queued during an outage is dropped
    // by the publish call failing, never buffered.
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    if rpc_tx.send(p.payload.to_vec()).await.is_err() {
                        return;
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt connected"),
                Ok(Event::Incoming(Packet::Disconnect)) => warn!("mqtt disconnected"),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "mqtt error, reconnecting");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    // ── RPC dispatcher ──────────────────────────────────────────────
    tokio::spawn(rpc::run(rpc_rx, Arc::clone(&control), cmd_tx.clone()));

    // ── Telemetry publisher ─────────────────────────────────────────
    let tele_client = client.clone();
    tokio::spawn(async move {
        while let Some(record) = tele_rx.recv().await {
            match serde_json::to_vec(&record) {
                Ok(payload) => {
                    if let Err(e) = tele_client
                        .publish(TELEMETRY_TOPIC, QoS::AtLeastOnce, false, payload)
                        .await
                    {
                        warn!(error = %e, "telemetry publish failed, record dropped");
                    }
                }
                Err(e) => warn!(error = %e, "telemetry encode failed"),
            }
        }
    });

    // ── Bridge loop ─────────────────────────────────────────────────
    let bridge_task = tokio::spawn(bridge::run(
        line_rx,
        control,
        cmd_tx,
        tele_tx,
        cfg.thresholds(),
        cfg.publish_interval(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt, shutting down");
            client.disconnect().await.ok();
            Ok(())
        }
        res = bridge_task => {
            client.disconnect().await.ok();
            res?;
            // The bridge loop only returns when the serial line channel
            // closes; without a serial link there is no safe way to actuate.
            bail!("serial link lost, terminating");
        }
    }
}
