//! Serial link to the sensor/actuator microcontroller. The `serial` feature
//! gates the real serialport driver; without it, a simulator generates
//! plausible sensor lines so the whole pipeline runs with no hardware.
//!
//! Either way, `start` wires two halves:
//! - a reader feeding complete lines into a bounded channel. When the device
//!   is lost the channel closes and the bridge loop shuts the process down.
//! - a writer draining the `HoseCommand` channel. Each token is written in a
//!   single call, so commands from the bridge loop and the RPC dispatcher
//!   never interleave mid-token.

use anyhow::Result;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::control::HoseCommand;

/// Open the serial link (or start the simulator) and spawn its reader and
/// writer halves. Fails only on open errors, before anything is spawned.
pub fn start(
    cfg: &Config,
    lines: mpsc::Sender<String>,
    commands: mpsc::Receiver<HoseCommand>,
) -> Result<()> {
    imp::start(cfg, lines, commands)
}

// ---------------------------------------------------------------------------
// Real device (production — requires the `serial` feature and hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "serial")]
mod imp {
    use std::io::{self, Read, Write};

    use anyhow::{Context, Result};
    use serialport::SerialPort;
    use tokio::sync::mpsc;
    use tracing::{debug, error, info};

    use crate::config::Config;
    use crate::control::HoseCommand;

    pub(super) fn start(
        cfg: &Config,
        lines: mpsc::Sender<String>,
        commands: mpsc::Receiver<HoseCommand>,
    ) -> Result<()> {
        let reader = serialport::new(&cfg.serial_device, cfg.baud)
            .timeout(cfg.serial_timeout())
            .flow_control(serialport::FlowControl::None)
            .open()
            .with_context(|| format!("failed to open serial device {}", cfg.serial_device))?;
        let writer = reader
            .try_clone()
            .context("failed to clone serial handle for writing")?;

        info!(device = %cfg.serial_device, baud = cfg.baud, "serial opened");

        // Blocking reads live on a plain thread; the writer stays async since
        // token writes are tiny.
        std::thread::spawn(move || read_loop(reader, lines));
        tokio::spawn(write_loop(writer, commands));
        Ok(())
    }

    fn read_loop(mut port: Box<dyn SerialPort>, lines: mpsc::Sender<String>) {
        let mut chunk = [0u8; 256];
        let mut pending: Vec<u8> = Vec::new();

        loop {
            match port.read(&mut chunk) {
                Ok(0) => {
                    error!("serial device closed");
                    break;
                }
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                        let raw: Vec<u8> = pending.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&raw).into_owned();
                        if lines.blocking_send(line).is_err() {
                            return; // bridge loop gone, shutting down
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    // Nothing for a whole timeout window: any half-received
                    // line is stale, drop it.
                    pending.clear();
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!(error = %e, "serial read failed");
                    break;
                }
            }
        }
        // Dropping `lines` closes the channel; main treats that as fatal.
    }

    async fn write_loop(mut port: Box<dyn SerialPort>, mut commands: mpsc::Receiver<HoseCommand>) {
        while let Some(cmd) = commands.recv().await {
            let result = port.write_all(cmd.token()).and_then(|()| port.flush());
            if let Err(e) = result {
                error!(error = %e, ?cmd, "serial write failed");
                return;
            }
            debug!(?cmd, "actuator token written");
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator (development — no hardware, `sim` feature)
// ---------------------------------------------------------------------------

#[cfg(not(feature = "serial"))]
mod imp {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use tokio::sync::mpsc;
    use tokio::time::sleep;
    use tracing::info;

    use crate::config::Config;
    use crate::control::HoseCommand;

    /// How often the simulated firmware emits a reading.
    const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

    const RAW_WET: f64 = 80.0;
    const RAW_DRY: f64 = 800.0;

    pub(super) fn start(
        _cfg: &Config,
        lines: mpsc::Sender<String>,
        commands: mpsc::Receiver<HoseCommand>,
    ) -> Result<()> {
        info!("[sim-serial] no hardware, generating synthetic sensor lines");
        let watering = Arc::new(AtomicBool::new(false));
        tokio::spawn(generate(lines, Arc::clone(&watering)));
        tokio::spawn(sink(commands, watering));
        Ok(())
    }

    /// Soil that dries slowly and re-wets while the hose is on, with a little
    /// per-reading noise. Closes the loop: HOSE_ON eventually produces wet
    /// readings, which in auto mode produces HOSE_OFF.
    struct SimSoil {
        raw: f64,
    }

    impl SimSoil {
        fn new() -> Self {
            Self { raw: 450.0 }
        }

        fn tick(&mut self, watering: bool) -> (i64, i64) {
            let drift = 4.0; // evaporation, toward dry
            let wet = if watering { -30.0 } else { 0.0 };
            let noise = (fastrand::f64() - 0.5) * 30.0;
            self.raw = (self.raw + drift + wet + noise).clamp(RAW_WET, RAW_DRY);

            let level = (self.raw / 100.0) as i64;
            (level, self.raw.round() as i64)
        }
    }

    async fn generate(lines: mpsc::Sender<String>, watering: Arc<AtomicBool>) {
        let mut soil = SimSoil::new();
        // A boot banner, like the real firmware.
        if lines.send("READY\n".to_string()).await.is_err() {
            return;
        }
        loop {
            let line = if fastrand::f32() < 0.02 {
                // Occasional line noise, the bridge should shrug it off.
                "\u{fffd}x\u{fffd}\n".to_string()
            } else {
                let (level, raw) = soil.tick(watering.load(Ordering::Relaxed));
                format!("SOIL:{level},RAW:{raw}\n")
            };
            if lines.send(line).await.is_err() {
                return;
            }
            sleep(SAMPLE_INTERVAL).await;
        }
    }

    async fn sink(mut commands: mpsc::Receiver<HoseCommand>, watering: Arc<AtomicBool>) {
        while let Some(cmd) = commands.recv().await {
            watering.store(cmd.is_on(), Ordering::Relaxed);
            info!(
                token = %String::from_utf8_lossy(cmd.token()).trim(),
                "[sim-serial] actuator token"
            );
        }
    }

    // =======================================================================
    // Tests
    // =======================================================================

}
