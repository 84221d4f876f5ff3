//! The bridge loop: serial lines in, actuator commands and telemetry out.
//!
//! One sequential task. Each iteration takes one line off the channel fed by
//! the serial reader, classifies it, runs the hysteresis policy under the
//! control write lock, forwards any resulting actuator command to the serial
//! writer task, and hands a telemetry record to the publisher task. A short
//! pacing sleep bounds the publish rate.
//!
//! The loop ends when the line channel closes, which only happens when the
//! serial device is lost — main treats that as fatal.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::control::{decide, HoseCommand, SharedControl, Thresholds};
use crate::line::{classify, SensorReading, SerialLine};

// ---------------------------------------------------------------------------
// Telemetry record
// ---------------------------------------------------------------------------

/// One telemetry publish: the reading plus the actuator state that resulted
/// from it. Built fresh each iteration, serialized to JSON on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Telemetry {
    pub soil_level: i64,
    pub soil_raw: i64,
    pub hose_on: bool,
    pub auto_enabled: bool,
}

impl Telemetry {
    fn new(reading: &SensorReading, hose_on: bool, auto_enabled: bool) -> Self {
        Self {
            soil_level: reading.level,
            soil_raw: reading.raw,
            hose_on,
            auto_enabled,
        }
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Run the bridge loop until the line channel closes.
pub async fn run(
    mut lines: mpsc::Receiver<String>,
    control: SharedControl,
    commands: mpsc::Sender<HoseCommand>,
    telemetry: mpsc::Sender<Telemetry>,
    thresholds: Thresholds,
    pacing: Duration,
) {
    while let Some(line) = lines.recv().await {
        let reading = match classify(&line) {
            SerialLine::Reading(r) => r,
            SerialLine::Status => {
                info!(line = line.trim(), "serial status");
                continue;
            }
            SerialLine::Empty => continue,
            SerialLine::Unrecognized => {
                debug!(line = line.trim(), "unrecognized serial line, dropped");
                continue;
            }
        };

        // Decide and apply under one write-lock acquisition so a concurrent
        // manual override cannot slip between the read and the transition.
        // The command send also stays inside the lock to keep token order
        // consistent with state mutation order.
        let snapshot = {
            let mut st = control.write().await;
            if let Some(cmd) = decide(&st, &reading, thresholds) {
                st.auto_transition(cmd.is_on());
                info!(?cmd, level = reading.level, "auto hysteresis transition");
                if commands.send(cmd).await.is_err() {
                    warn!("serial writer gone, stopping bridge loop");
                    return;
                }
            }
            *st
        };

        let record = Telemetry::new(&reading, snapshot.hose_on, snapshot.auto_enabled);
        if telemetry.send(record).await.is_err() {
            warn!("telemetry consumer gone, stopping bridge loop");
            return;
        }

        sleep(pacing).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{shared, ControlState};
    use std::sync::Arc;

    const T: Thresholds = Thresholds {
        dry_on_level: 4,
        wet_off_level: 1,
    };

    struct Harness {
        line_tx: mpsc::Sender<String>,
        cmd_rx: mpsc::Receiver<HoseCommand>,
        tele_rx: mpsc::Receiver<Telemetry>,
        control: SharedControl,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start(auto_enabled: bool) -> Harness {
        let control = shared(auto_enabled);
        let (line_tx, line_rx) = mpsc::channel(16);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (tele_tx, tele_rx) = mpsc::channel(16);
        let handle = tokio::spawn(run(
            line_rx,
            Arc::clone(&control),
            cmd_tx,
            tele_tx,
            T,
            Duration::ZERO,
        ));
        Harness {
            line_tx,
            cmd_rx,
            tele_rx,
            control,
            handle,
        }
    }

    // -- end-to-end hysteresis scenario --------------------------------------

    #[tokio::test]
    async fn scenario_dry_then_wet() {
        let mut h = start(true);

        for line in ["SOIL:3,RAW:400", "SOIL:4,RAW:560", "SOIL:1,RAW:120"] {
            h.line_tx.send(line.to_string()).await.unwrap();
        }
        drop(h.line_tx);
        h.handle.await.unwrap();

        // Line 1 sits inside the band, line 2 crosses dry-on, line 3 wet-off.
        assert_eq!(h.cmd_rx.recv().await, Some(HoseCommand::On));
        assert_eq!(h.cmd_rx.recv().await, Some(HoseCommand::Off));
        assert_eq!(h.cmd_rx.recv().await, None);

        let t1 = h.tele_rx.recv().await.unwrap();
        assert_eq!(
            t1,
            Telemetry {
                soil_level: 3,
                soil_raw: 400,
                hose_on: false,
                auto_enabled: true
            }
        );
        let t2 = h.tele_rx.recv().await.unwrap();
        assert!(t2.hose_on, "telemetry must reflect post-decision state");
        assert_eq!(t2.soil_level, 4);
        let t3 = h.tele_rx.recv().await.unwrap();
        assert!(!t3.hose_on);
        assert_eq!(t3.soil_raw, 120);
        assert_eq!(h.tele_rx.recv().await, None);

        assert_eq!(
            *h.control.read().await,
            ControlState {
                hose_on: false,
                auto_enabled: true
            }
        );
    }

    #[tokio::test]
    async fn repeated_dry_readings_command_once() {
        let mut h = start(true);

        for _ in 0..3 {
            h.line_tx.send("SOIL:5,RAW:600".to_string()).await.unwrap();
        }
        drop(h.line_tx);
        h.handle.await.unwrap();

        assert_eq!(h.cmd_rx.recv().await, Some(HoseCommand::On));
        assert_eq!(h.cmd_rx.recv().await, None, "TurnOn must not repeat or toggle");

        // Telemetry still flows for every reading.
        let mut count = 0;
        while h.tele_rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn auto_disabled_publishes_but_never_commands() {
        let mut h = start(false);

        h.line_tx.send("SOIL:7,RAW:800".to_string()).await.unwrap();
        drop(h.line_tx);
        h.handle.await.unwrap();

        assert_eq!(h.cmd_rx.recv().await, None);
        let t = h.tele_rx.recv().await.unwrap();
        assert!(!t.hose_on);
        assert!(!t.auto_enabled);
    }

    // -- non-reading lines ---------------------------------------------------

    #[tokio::test]
    async fn status_and_noise_lines_produce_nothing() {
        let mut h = start(true);

        for line in ["READY", "ACK:HOSE_ON", "", "SOIL:5,RA", "garbage"] {
            h.line_tx.send(line.to_string()).await.unwrap();
        }
        drop(h.line_tx);
        h.handle.await.unwrap();

        assert_eq!(h.cmd_rx.recv().await, None);
        assert_eq!(h.tele_rx.recv().await, None);
    }

    // -- serialization -------------------------------------------------------

    #[test]
    fn telemetry_serializes_with_expected_keys() {
        let t = Telemetry {
            soil_level: 4,
            soil_raw: 560,
            hose_on: true,
            auto_enabled: false,
        };
        let json = serde_json::to_value(t).unwrap();
        assert_eq!(json["soil_level"], 4);
        assert_eq!(json["soil_raw"], 560);
        assert_eq!(json["hose_on"], true);
        assert_eq!(json["auto_enabled"], false);
        assert_eq!(json.as_object().unwrap().len(), 4);
    }
}
