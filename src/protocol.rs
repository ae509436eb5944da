//! deej serial line protocol
//!
//! Classifies lines received from the slider board and encodes the commands
//! sent back to it. Two formats coexist on the wire:
//!
//! - framed: `deej:<version>:<type>:<payload...>`
//! - legacy: bare `v0|v1|...` slider lines, `status:<level>` and `heartbeat`
//!
//! The serial link is noisy (a torn first line after connecting is normal),
//! so every line is verified independently and anything unrecognized is
//! dropped rather than treated as an error.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Firmware protocol version we speak when sending commands
pub const FIRMWARE_VERSION: &str = "v2.0";

/// Highest raw reading a slider can report (10-bit ADC)
pub const MAX_RAW_READING: u16 = 1023;

const FRAME_PREFIX: &str = "deej:";
const STATUS_PREFIX: &str = "status:";
const HEARTBEAT: &str = "heartbeat";

static LEGACY_SLIDER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,4}(\|\d{1,4})*$").expect("static regex"));

/// One decoded line from the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Keep-alive marker
    Heartbeat,

    /// Legacy `status:<level>` line
    Status(LinkHealth),

    /// Board finished booting
    Startup { version: String, capabilities: String },

    /// Raw slider readings, one per slider
    Sliders(SliderFrame),

    /// Reply to a command we sent
    Response(CommandResponse),
}

/// Health reported by the board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    Healthy,
    Unhealthy,
}

/// Validated slider readings, each in `0..=1023`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliderFrame {
    readings: Vec<u16>,
}

/// Command acknowledgement sent back by the firmware
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResponse {
    RebootAck,
    Version(Option<String>),
    Error { kind: Option<String>, details: Option<String> },
    Unknown { subtype: String, args: Vec<String> },
}

/// Commands understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reboot,
    Version,
    Sliders,
}

impl Message {
    /// Parse a single line (with or without its trailing CR/LF)
    ///
    /// Returns `None` for anything malformed or unrecognized.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if line == HEARTBEAT {
            return Some(Message::Heartbeat);
        }

        if let Some(framed) = line.strip_prefix(FRAME_PREFIX) {
            return Self::parse_framed(framed);
        }

        if let Some(status) = line.strip_prefix(STATUS_PREFIX) {
            let health = match status.trim() {
                "ok" | "warning" => LinkHealth::Healthy,
                _ => LinkHealth::Unhealthy,
            };
            return Some(Message::Status(health));
        }

        if LEGACY_SLIDER_LINE.is_match(line) {
            return SliderFrame::parse(line).map(Message::Sliders);
        }

        None
    }

    fn parse_framed(rest: &str) -> Option<Self> {
        let parts: Vec<&str> = rest.split(':').collect();
        if parts.len() < 2 {
            return None;
        }

        let version = parts[0];
        let payload = &parts[2..];

        match parts[1] {
            "startup" => Some(Message::Startup {
                version: version.to_string(),
                capabilities: payload.first().map(|c| c.to_string()).unwrap_or_default(),
            }),
            "sliders" => payload
                .first()
                .and_then(|data| SliderFrame::parse(data))
                .map(Message::Sliders),
            "response" => {
                let (subtype, args) = payload.split_first()?;
                Some(Message::Response(CommandResponse::from_parts(subtype, args)))
            }
            _ => None,
        }
    }
}

impl SliderFrame {
    /// Parse a `|`-separated list of readings
    ///
    /// Each field must be 1-4 ASCII digits and at most 1023. A first field
    /// above range is the usual signature of a torn read right after the
    /// port opens.
    pub fn parse(data: &str) -> Option<Self> {
        let mut readings = Vec::new();

        for field in data.trim().split('|') {
            if field.is_empty() || field.len() > 4 || !field.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }

            let value: u16 = field.parse().ok()?;
            if value > MAX_RAW_READING {
                return None;
            }

            readings.push(value);
        }

        Some(Self { readings })
    }

    pub fn readings(&self) -> &[u16] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

impl From<Vec<u16>> for SliderFrame {
    fn from(readings: Vec<u16>) -> Self {
        Self {
            readings: readings.into_iter().map(|r| r.min(MAX_RAW_READING)).collect(),
        }
    }
}

impl CommandResponse {
    fn from_parts(subtype: &str, args: &[&str]) -> Self {
        match subtype {
            "reboot_ack" => CommandResponse::RebootAck,
            "version" => CommandResponse::Version(args.first().map(|v| v.to_string())),
            "error" => CommandResponse::Error {
                kind: args.first().map(|v| v.to_string()),
                details: args.get(1).map(|v| v.to_string()),
            },
            other => CommandResponse::Unknown {
                subtype: other.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
            },
        }
    }
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Reboot => "reboot",
            Command::Version => "version",
            Command::Sliders => "sliders",
        }
    }

    /// Encode to the wire form, newline included
    pub fn encode(&self) -> Vec<u8> {
        format!("{}{}:command:{}\n", FRAME_PREFIX, FIRMWARE_VERSION, self.name()).into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a line carries the framed protocol prefix (used by port probing)
pub fn is_framed(line: &str) -> bool {
    line.trim().starts_with(FRAME_PREFIX)
}
