//! Serial port connector and deej board discovery

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};
use tracing::{debug, info, warn};

use super::reader::LineReader;
use super::LinkError;
use crate::config::ConnectionInfo;
use crate::protocol::{self, Command};

/// Lines read from a candidate port before giving up on it
const PROBE_ATTEMPTS: usize = 3;
/// Wait per probe line
const PROBE_READ_TIMEOUT: Duration = Duration::from_millis(1500);

pub type LinkReader = Box<dyn AsyncRead + Send + Unpin>;
pub type LinkWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An open byte link to the board
pub struct Connection {
    pub port_name: String,
    pub reader: LinkReader,
    pub writer: LinkWriter,
}

impl Connection {
    pub fn new<S>(port_name: impl Into<String>, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            port_name: port_name.into(),
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// Opens links to the board
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, params: &ConnectionInfo) -> Result<Connection, LinkError>;
}

/// `tokio-serial` backed connector
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self, params: &ConnectionInfo) -> Result<Connection, LinkError> {
        let port_name = if params.wants_auto_detect() {
            detect_port(params.baud_rate).await?
        } else {
            params.com_port.clone()
        };

        info!("Opening serial port: {} at {} baud", port_name, params.baud_rate);
        let stream = open(&port_name, params.baud_rate)?;
        Ok(Connection::new(port_name, stream))
    }
}

fn open(port_name: &str, baud_rate: u32) -> Result<SerialStream, LinkError> {
    tokio_serial::new(port_name, baud_rate)
        .open_native_async()
        .map_err(|e| classify_open_error(port_name, e))
}

fn classify_open_error(port_name: &str, err: tokio_serial::Error) -> LinkError {
    match err.kind() {
        tokio_serial::ErrorKind::NoDevice | tokio_serial::ErrorKind::Io(io::ErrorKind::NotFound) => {
            LinkError::PortNotFound(port_name.to_string())
        }
        tokio_serial::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            LinkError::PermissionDenied(port_name.to_string())
        }
        _ => LinkError::Open {
            port: port_name.to_string(),
            reason: err.to_string(),
        },
    }
}

/// Serial ports that might have a board behind them
pub fn candidate_ports() -> Vec<String> {
    match tokio_serial::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .filter(|p| {
                matches!(p.port_type, SerialPortType::UsbPort(_))
                    || p.port_name.contains("ttyUSB")
                    || p.port_name.contains("ttyACM")
            })
            .map(|p| p.port_name)
            .collect(),
        Err(e) => {
            warn!("Failed to enumerate serial ports: {}", e);
            Vec::new()
        }
    }
}

/// Every serial port with its type, for `--list-ports`
pub fn list_ports() -> Result<Vec<(String, String)>, LinkError> {
    let ports = tokio_serial::available_ports().map_err(|e| LinkError::Open {
        port: "*".to_string(),
        reason: e.to_string(),
    })?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let kind = match p.port_type {
                SerialPortType::UsbPort(info) => format!(
                    "USB {:04x}:{:04x} {}",
                    info.vid,
                    info.pid,
                    info.product.unwrap_or_default()
                ),
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::Unknown => "unknown".to_string(),
            };
            (p.port_name, kind)
        })
        .collect())
}

/// Find the first candidate port that speaks the framed protocol
pub async fn detect_port(baud_rate: u32) -> Result<String, LinkError> {
    let candidates = candidate_ports();
    debug!(?candidates, "Probing serial ports for a deej board");

    for port_name in candidates {
        match probe(&port_name, baud_rate).await {
            Ok(true) => {
                info!("🎚️ Found deej board on {}", port_name);
                return Ok(port_name);
            }
            Ok(false) => debug!("No deej board on {}", port_name),
            Err(e) => debug!("Skipping {}: {}", port_name, e),
        }
    }

    Err(LinkError::NoDeviceFound)
}

async fn probe(port_name: &str, baud_rate: u32) -> Result<bool, LinkError> {
    let stream = open(port_name, baud_rate)?;
    let Connection {
        reader, mut writer, ..
    } = Connection::new(port_name, stream);

    probe_link(reader, &mut writer).await
}

/// Ask for slider values and wait for a framed reply
///
/// A board that answers is told to reboot so it replays its startup
/// sequence once the real connection is opened.
pub(crate) async fn probe_link<R, W>(reader: R, writer: &mut W) -> Result<bool, LinkError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_all(&Command::Sliders.encode()).await?;
    writer.flush().await?;

    let mut lines = LineReader::new(reader);
    for _ in 0..PROBE_ATTEMPTS {
        match tokio::time::timeout(PROBE_READ_TIMEOUT, lines.next_line()).await {
            Ok(Ok(line)) if protocol::is_framed(&line) => {
                writer.write_all(&Command::Reboot.encode()).await?;
                writer.flush().await?;
                return Ok(true);
            }
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => return Err(e),
            Err(_) => continue,
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_probe_accepts_framed_reply() {
        let (device, host) = tokio::io::duplex(256);
        let (host_read, mut host_write) = tokio::io::split(host);
        let (device_read, mut device_write) = tokio::io::split(device);

        let board = tokio::spawn(async move {
            let mut commands = BufReader::new(device_read).lines();
            let first = commands.next_line().await.unwrap().unwrap();
            device_write.write_all(b"garbage\r\ndeej:v2.0:sliders:1|2\r\n").await.unwrap();
            let second = commands.next_line().await.unwrap().unwrap();
            (first, second)
        });

        assert!(probe_link(host_read, &mut host_write).await.unwrap());

        let (first, second) = board.await.unwrap();
        assert_eq!(first, "deej:v2.0:command:sliders");
        assert_eq!(second, "deej:v2.0:command:reboot");
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_rejects_silent_port() {
        let (_device, host) = tokio::io::duplex(256);
        let (host_read, mut host_write) = tokio::io::split(host);

        assert!(!probe_link(host_read, &mut host_write).await.unwrap());
    }

    #[tokio::test]
    async fn test_probe_rejects_legacy_only_port() {
        let (mut device, host) = tokio::io::duplex(256);
        let (host_read, mut host_write) = tokio::io::split(host);

        device.write_all(b"1|2|3\r\n4|5|6\r\n7|8|9\r\n").await.unwrap();
        assert!(!probe_link(host_read, &mut host_write).await.unwrap());
    }

    #[test]
    fn test_classify_open_errors() {
        let not_found = tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "gone");
        assert!(matches!(
            classify_open_error("/dev/ttyUSB9", not_found),
            LinkError::PortNotFound(p) if p == "/dev/ttyUSB9"
        ));

        let denied = tokio_serial::Error::new(
            tokio_serial::ErrorKind::Io(io::ErrorKind::PermissionDenied),
            "EACCES",
        );
        assert!(matches!(classify_open_error("/dev/ttyACM0", denied), LinkError::PermissionDenied(_)));

        let other = tokio_serial::Error::new(tokio_serial::ErrorKind::InvalidInput, "bad baud");
        assert!(matches!(classify_open_error("/dev/ttyACM0", other), LinkError::Open { .. }));
    }
}
