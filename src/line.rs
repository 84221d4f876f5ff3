//! Parsing of the line-oriented serial protocol spoken by the sensor
//! microcontroller.
//!
//! The firmware emits one reading per line as `SOIL:<level>,RAW:<raw>`, plus
//! `ACK:<cmd>` acknowledgements and a single `READY` banner at boot. Anything
//! else on the wire (partial lines cut off by a read timeout, boot garbage) is
//! noise and gets dropped.

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One parsed soil moisture reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorReading {
    /// Discrete moisture category reported by the firmware (higher = drier).
    pub level: i64,
    /// Raw ADC value behind the category, kept for telemetry.
    pub raw: i64,
}

/// Classification of a single inbound serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialLine {
    /// A well-formed `SOIL:<level>,RAW:<raw>` reading.
    Reading(SensorReading),
    /// An `ACK:*` acknowledgement or the `READY` boot banner.
    Status,
    /// Blank line, typically a read timeout.
    Empty,
    /// Anything else: truncated readings, line noise.
    Unrecognized,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a reading line of the exact shape `SOIL:<int>,RAW:<int>`.
///
/// Returns `None` for any other shape. Malformed lines are routine on a lossy
/// serial link, so there is deliberately no error detail here.
pub fn parse_reading(line: &str) -> Option<SensorReading> {
    let line = line.trim();
    let (soil, raw) = line.split_once(',')?;
    let level = soil.strip_prefix("SOIL:")?.parse().ok()?;
    let raw = raw.strip_prefix("RAW:")?.parse().ok()?;
    Some(SensorReading { level, raw })
}

/// Classify one inbound serial line.
pub fn classify(line: &str) -> SerialLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        SerialLine::Empty
    } else if trimmed.starts_with("ACK:") || trimmed == "READY" {
        SerialLine::Status
    } else if let Some(reading) = parse_reading(trimmed) {
        SerialLine::Reading(reading)
    } else {
        SerialLine::Unrecognized
    }
}

// ===========================================================================
// Tests
// ===========================================================================
