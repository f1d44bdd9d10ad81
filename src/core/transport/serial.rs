//! Serial port configuration and the `serialport` driver binding

use super::{SerialChannel, TransportError};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::collections::VecDeque;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Baud rates the handset link accepts
pub const ALLOWED_SPEEDS: &[u32] = &[
    300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 38400, 57600, 115_200, 230_400, 460_800,
    921_600,
];

/// Character sizes the handset link accepts
pub const ALLOWED_DATA_BITS: &[u8] = &[5, 6, 7, 8];

/// Driver-side read timeout used by the background reader thread
const DRIVER_POLL: Duration = Duration::from_millis(100);

/// Check a baud rate against [`ALLOWED_SPEEDS`]
pub fn is_allowable_speed(speed: u32) -> bool {
    ALLOWED_SPEEDS.contains(&speed)
}

/// Check a character size against [`ALLOWED_DATA_BITS`]
pub fn is_allowable_data_bits(bits: u8) -> bool {
    ALLOWED_DATA_BITS.contains(&bits)
}

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Software flow control (XON/XOFF)
    Software,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Hardware and software together
    Both,
}

impl std::str::FromStr for SerialFlowControl {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "software" | "sw" | "xonxoff" => Ok(Self::Software),
            "hardware" | "hw" | "rtscts" => Ok(Self::Hardware),
            "both" => Ok(Self::Both),
            other => Err(TransportError::InvalidConfiguration(format!(
                "unknown flow control '{other}'"
            ))),
        }
    }
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
    /// Parity bit always 0
    Space,
    /// Parity bit always 1
    Mark,
}

impl std::str::FromStr for SerialParity {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "even" | "e" => Ok(Self::Even),
            "odd" | "o" => Ok(Self::Odd),
            "space" | "s" => Ok(Self::Space),
            "mark" | "m" => Ok(Self::Mark),
            other => Err(TransportError::InvalidConfiguration(format!(
                "unknown parity '{other}'"
            ))),
        }
    }
}

/// Serial port stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialStopBits {
    /// One stop bit
    #[default]
    #[serde(rename = "1")]
    One,
    /// One and a half stop bits
    #[serde(rename = "1.5")]
    OnePointFive,
    /// Two stop bits
    #[serde(rename = "2")]
    Two,
}

impl std::str::FromStr for SerialStopBits {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(Self::One),
            "1.5" => Ok(Self::OnePointFive),
            "2" => Ok(Self::Two),
            other => Err(TransportError::InvalidConfiguration(format!(
                "unknown stop bits '{other}'"
            ))),
        }
    }
}

/// Serial port configuration, copied into a session when it opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits
    pub stop_bits: SerialStopBits,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
}

impl PortConfig {
    /// Create a new port configuration with 8N1 and no flow control
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: SerialStopBits::One,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: SerialStopBits) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set flow control
    #[must_use]
    pub fn flow_control(mut self, flow: SerialFlowControl) -> Self {
        self.flow_control = flow;
        self
    }

    /// Check the configuration against the fixed allow-lists
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.port.trim().is_empty() {
            return Err(TransportError::InvalidConfiguration(
                "port name is empty".to_string(),
            ));
        }
        if !is_allowable_speed(self.baud_rate) {
            return Err(TransportError::InvalidConfiguration(format!(
                "unsupported speed {}",
                self.baud_rate
            )));
        }
        if !is_allowable_data_bits(self.data_bits) {
            return Err(TransportError::InvalidConfiguration(format!(
                "unsupported data bits {}",
                self.data_bits
            )));
        }
        Ok(())
    }

    /// Windows-style names ("COM3") are not filesystem paths and skip the
    /// existence check.
    fn check_path(&self) -> Result<(), TransportError> {
        if self.port.to_uppercase().starts_with("COM") || Path::new(&self.port).exists() {
            Ok(())
        } else {
            Err(TransportError::PortNotFound(self.port.clone()))
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0", 115_200)
    }
}

impl fmt::Display for PortConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} baud ({}{}{} {})",
            self.port,
            self.baud_rate,
            self.data_bits,
            match self.parity {
                SerialParity::None => "N",
                SerialParity::Even => "E",
                SerialParity::Odd => "O",
                SerialParity::Space => "S",
                SerialParity::Mark => "M",
            },
            match self.stop_bits {
                SerialStopBits::One => "1",
                SerialStopBits::OnePointFive => "1.5",
                SerialStopBits::Two => "2",
            },
            match self.flow_control {
                SerialFlowControl::None => "No FC",
                SerialFlowControl::Software => "SW FC",
                SerialFlowControl::Hardware => "HW FC",
                SerialFlowControl::Both => "HW+SW FC",
            }
        )
    }
}

/// Serial port channel backed by the `serialport` driver.
///
/// A background thread reads from a clone of the port handle and forwards
/// chunks over a crossbeam channel, which doubles as the data-ready wakeup.
pub struct SerialPortChannel {
    port: Option<Box<dyn SerialPort>>,
    rx: Option<Receiver<Vec<u8>>>,
    pending: VecDeque<u8>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SerialPortChannel {
    /// Create a closed channel
    pub fn new() -> Self {
        Self {
            port: None,
            rx: None,
            pending: VecDeque::new(),
            stop: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    fn drain_incoming(&mut self) {
        if let Some(rx) = &self.rx {
            while let Ok(chunk) = rx.try_recv() {
                self.pending.extend(chunk);
            }
        }
    }

    fn driver_settings(
        config: &PortConfig,
    ) -> Result<(DataBits, StopBits, Parity, FlowControl), TransportError> {
        let data_bits = match config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match config.stop_bits {
            SerialStopBits::One => StopBits::One,
            SerialStopBits::Two => StopBits::Two,
            SerialStopBits::OnePointFive => {
                return Err(TransportError::InvalidConfiguration(
                    "driver does not support 1.5 stop bits".to_string(),
                ))
            }
        };

        let parity = match config.parity {
            SerialParity::None => Parity::None,
            SerialParity::Even => Parity::Even,
            SerialParity::Odd => Parity::Odd,
            SerialParity::Space | SerialParity::Mark => {
                return Err(TransportError::InvalidConfiguration(
                    "driver does not support space/mark parity".to_string(),
                ))
            }
        };

        let flow_control = match config.flow_control {
            SerialFlowControl::None => FlowControl::None,
            SerialFlowControl::Software => FlowControl::Software,
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Both => {
                return Err(TransportError::InvalidConfiguration(
                    "driver does not support combined flow control".to_string(),
                ))
            }
        };

        Ok((data_bits, stop_bits, parity, flow_control))
    }
}

impl Default for SerialPortChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialChannel for SerialPortChannel {
    fn open(&mut self, config: &PortConfig) -> Result<(), TransportError> {
        self.close();
        config.check_path()?;
        let (data_bits, stop_bits, parity, flow_control) = Self::driver_settings(config)?;

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .timeout(DRIVER_POLL)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound(config.port.clone()),
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(config.port.clone())
                }
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        let mut reader_port = port
            .try_clone()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = Arc::clone(&stop);

        let reader = std::thread::Builder::new()
            .name(format!("serial-reader {}", config.port))
            .spawn(move || {
                let mut buf = [0u8; 4096];
                while !reader_stop.load(Ordering::Relaxed) {
                    match reader_port.read(&mut buf) {
                        Ok(0) => {}
                        Ok(n) => {
                            if tx.send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(e) => {
                            tracing::warn!("Serial reader stopped: {}", e);
                            break;
                        }
                    }
                }
            })?;

        tracing::debug!("Opened {}", config);
        self.port = Some(port);
        self.rx = Some(rx);
        self.stop = stop;
        self.reader = Some(reader);
        Ok(())
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.port = None;
        self.rx = None;
        self.pending.clear();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        if self.port.is_none() {
            return Err(TransportError::NotConnected);
        }
        self.drain_incoming();
        Ok(self.pending.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.port.is_none() {
            return Err(TransportError::NotConnected);
        }
        self.drain_incoming();
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn wait_for_data(&mut self, timeout: Duration) -> bool {
        if !self.pending.is_empty() {
            return true;
        }
        let Some(rx) = &self.rx else {
            return false;
        };
        match rx.recv_timeout(timeout) {
            Ok(chunk) => {
                self.pending.extend(chunk);
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }
}

impl Drop for SerialPortChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowable_speeds() {
        for speed in ALLOWED_SPEEDS {
            assert!(is_allowable_speed(*speed));
        }
        for speed in [0, 110, 9601, 28800, 100_000, 1_000_000] {
            assert!(!is_allowable_speed(speed));
        }
    }

    #[test]
    fn test_allowable_data_bits() {
        for bits in 0..=16u8 {
            assert_eq!(is_allowable_data_bits(bits), (5..=8).contains(&bits));
        }
    }

    #[test]
    fn test_validate() {
        assert!(PortConfig::new("COM3", 115_200).validate().is_ok());
        assert!(PortConfig::new("COM3", 115_201).validate().is_err());
        assert!(PortConfig::new("COM3", 9600).data_bits(9).validate().is_err());
        assert!(PortConfig::new("  ", 9600).validate().is_err());
    }

    #[test]
    fn test_path_check() {
        assert!(PortConfig::new("COM7", 9600).check_path().is_ok());
        assert!(matches!(
            PortConfig::new("/dev/does-not-exist-phonelink", 9600).check_path(),
            Err(TransportError::PortNotFound(_))
        ));
    }

    #[test]
    fn test_parse_line_settings() {
        assert_eq!("mark".parse::<SerialParity>().unwrap(), SerialParity::Mark);
        assert_eq!("1.5".parse::<SerialStopBits>().unwrap(), SerialStopBits::OnePointFive);
        assert_eq!("both".parse::<SerialFlowControl>().unwrap(), SerialFlowControl::Both);
        assert!("sideways".parse::<SerialParity>().is_err());
    }

    #[test]
    fn test_display() {
        let config = PortConfig::new("COM1", 9600).parity(SerialParity::Even);
        assert_eq!(config.to_string(), "COM1 @ 9600 baud (8E1 No FC)");
    }

    #[test]
    fn test_closed_channel() {
        let mut channel = SerialPortChannel::new();
        assert!(!channel.is_open());
        assert!(matches!(channel.bytes_available(), Err(TransportError::NotConnected)));
        assert!(!channel.wait_for_data(Duration::from_millis(1)));
        channel.close();
    }
}
