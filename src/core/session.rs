//! Phone session
//!
//! [`PhoneSession`] owns one channel and exposes the full handset operation
//! set on top of the [`CommandExecutor`]. Every operation takes `&mut self`,
//! so a session never has more than one command in flight; callers that
//! share a session across threads serialize through the
//! [`Orchestrator`](crate::core::orchestrator::Orchestrator).
//!
//! Failures are reported as [`PhoneError`], whose [`code`](PhoneError::code)
//! is stable and documented.

use crate::core::at::{commands, string_to_latin1, CommandExecutor, DialMode, ExchangeSettings};
use crate::core::phone::{
    parse_alarm_slots, parse_capabilities, parse_info_line, parse_pin_reply, parse_send_reference,
    parse_subscriber_numbers, DeviceInfo, PhoneAlarm, PhoneElement, PhoneMessage, PinStatus,
    SignalQuality,
};
use crate::core::protocol::FrameExtractor;
use crate::core::transfer::{self, BatchFailure, BatchReport, CancelToken, UploadFile, UploadReport, UploadStage};
use crate::core::transport::{PortConfig, SerialChannel, TransportError};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Session and operation failures
#[derive(Error, Debug)]
pub enum PhoneError {
    /// Upload handshake refused at a stage
    #[error("Upload failed at the {0} stage")]
    Upload(UploadStage),

    /// Nothing came back after every retry
    #[error("No answer from the phone")]
    NoAnswer,

    /// The handset answered with an error or without the expected marker
    #[error("Phone rejected the command: {0}")]
    Rejected(String),

    /// Upload handshake kept failing
    #[error("Gave up after {0} attempts")]
    TrialsExceeded(u32),

    /// No payload could be located in a retrieval reply
    #[error("No payload found in the phone's reply")]
    FrameNotFound,

    /// Local file missing, unreadable or empty
    #[error("Invalid file: {0}")]
    InvalidFile(String),

    /// File type the handset can't store
    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),

    /// Element reference without an id
    #[error("Invalid element: {0}")]
    InvalidElement(String),

    /// Caller supplied value rejected before sending
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Writing a downloaded file failed
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation called on a closed session
    #[error("Session is not open")]
    NotOpen,

    /// Port couldn't be opened or written
    #[error("Serial port error: {0}")]
    Port(#[from] TransportError),

    /// Stopped on request
    #[error("Cancelled")]
    Cancelled,

    /// The reply was acknowledged but couldn't be parsed
    #[error("Malformed reply: {0}")]
    Malformed(String),

    /// The operation panicked; the session was closed behind it
    #[error("Operation aborted: {0}")]
    Aborted(String),
}

impl PhoneError {
    /// Stable numeric code, always negative
    pub fn code(&self) -> i32 {
        match self {
            PhoneError::Upload(stage) => stage.code(),
            PhoneError::NoAnswer => -8,
            PhoneError::Rejected(_) => -9,
            PhoneError::TrialsExceeded(_) => -10,
            PhoneError::FrameNotFound => -11,
            PhoneError::InvalidFile(_) => -12,
            PhoneError::UnsupportedFile(_) => -13,
            PhoneError::InvalidElement(_) => -14,
            PhoneError::InvalidArgument(_) => -15,
            PhoneError::Io(_) => -16,
            PhoneError::NotOpen => -17,
            PhoneError::Port(_) => -18,
            PhoneError::Cancelled => -19,
            PhoneError::Malformed(_) => -20,
            PhoneError::Aborted(_) => -21,
        }
    }
}

/// Check a reply for a line consisting of `marker`
pub(crate) fn expect_marker(reply: &str, marker: &str) -> Result<(), PhoneError> {
    if reply.lines().any(|line| line.trim() == marker) {
        return Ok(());
    }
    if reply.trim().is_empty() {
        return Err(PhoneError::NoAnswer);
    }
    let last = reply
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or_default();
    Err(PhoneError::Rejected(last.to_string()))
}

fn expect_ok(reply: &str) -> Result<(), PhoneError> {
    expect_marker(reply, "OK")
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
}

/// Handset operations over one channel
pub struct PhoneSession<C: SerialChannel> {
    executor: CommandExecutor<C>,
    extractor: FrameExtractor,
    state: SessionState,
}

impl<C: SerialChannel> PhoneSession<C> {
    /// Create a closed session
    pub fn new(channel: C, settings: ExchangeSettings) -> Self {
        Self {
            executor: CommandExecutor::new(channel, settings),
            extractor: FrameExtractor::new(),
            state: SessionState::Closed,
        }
    }

    /// Validate `config` and open the port. Not retried.
    pub fn open(&mut self, config: PortConfig) -> Result<(), PhoneError> {
        let description = config.to_string();
        self.executor.open(config)?;
        self.state = SessionState::Open;
        tracing::info!("Session opened on {}", description);
        Ok(())
    }

    /// Release the port. Idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Open {
            tracing::info!("Session closed");
        }
        self.executor.close();
        self.state = SessionState::Closed;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open && self.executor.is_open()
    }

    /// Active port configuration
    pub fn config(&self) -> Option<&PortConfig> {
        self.executor.config()
    }

    pub fn settings(&self) -> &ExchangeSettings {
        self.executor.settings()
    }

    /// Times the port was re-opened by retries since creation
    pub fn reopen_events(&self) -> u32 {
        self.executor.reopen_events()
    }

    /// Underlying channel
    pub fn channel(&self) -> &C {
        self.executor.channel()
    }

    fn ensure_open(&self) -> Result<(), PhoneError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(PhoneError::NotOpen)
        }
    }

    /// Send `AT` three times; alive when any reply holds `OK`
    pub fn test_alive(&mut self) -> Result<(), PhoneError> {
        self.ensure_open()?;
        let mut replies = String::new();
        for _ in 0..3 {
            replies.push_str(&self.executor.execute(commands::ATTENTION, &[]));
        }
        if replies.contains("OK") {
            return Ok(());
        }
        expect_ok(&replies)
    }

    /// Visible elements of `category` (e.g. "PICTURES")
    pub fn list_elements(&mut self, category: &str) -> Result<Vec<PhoneElement>, PhoneError> {
        self.ensure_open()?;
        let category = category.trim();
        if category.is_empty() {
            return Err(PhoneError::InvalidArgument("empty category".to_string()));
        }
        check_argument(category)?;

        let reply = self.executor.execute(commands::CHARSET_LATIN1, &[]);
        if let Err(e) = expect_ok(&reply) {
            tracing::warn!("Charset setup failed: {}", e);
        }

        let reply = self.executor.execute(&commands::list_elements(category), &[]);
        expect_ok(&reply)?;
        let elements = PhoneElement::parse_listing(&reply);
        tracing::debug!("{} visible element(s) in {}", elements.len(), category);
        Ok(elements)
    }

    /// Retrieve `element` and write its payload to `destination`.
    /// Returns the number of bytes written.
    pub fn download_element(
        &mut self,
        element: &PhoneElement,
        destination: &Path,
    ) -> Result<u64, PhoneError> {
        self.ensure_open()?;
        check_element(element)?;

        let reply = self
            .executor
            .execute_raw(&commands::retrieve_element(&element.id), &[]);
        if reply.is_blank() {
            return Err(PhoneError::NoAnswer);
        }

        let Some(frame) = self.extractor.extract(reply.bytes()) else {
            if reply.is_error() {
                return Err(PhoneError::Rejected(reply.text().trim().to_string()));
            }
            return Err(PhoneError::FrameNotFound);
        };

        std::fs::write(destination, frame.payload)?;
        tracing::info!(
            "Downloaded {} ({} bytes, {}) to {}",
            element.id,
            frame.payload.len(),
            frame.format,
            destination.display()
        );
        Ok(frame.payload.len() as u64)
    }

    /// Upload a local file, stored on the handset as `new_name` (or the
    /// file stem)
    pub fn upload_file(&mut self, file: &Path, new_name: Option<&str>) -> Result<UploadReport, PhoneError> {
        self.ensure_open()?;
        let upload = UploadFile::from_path(file, new_name)?;
        transfer::upload(&mut self.executor, &upload)
    }

    /// Download every visible element of `category` into `dir`.
    /// Per-element failures are collected, not returned; the cancel token is
    /// checked before each element.
    pub fn download_all(
        &mut self,
        category: &str,
        dir: &Path,
        cancel: &CancelToken,
    ) -> Result<BatchReport, PhoneError> {
        let elements = self.list_elements(category)?;
        std::fs::create_dir_all(dir)?;

        let mut report = BatchReport::default();
        for (index, element) in elements.iter().enumerate() {
            if cancel.is_cancelled() {
                report.skipped = elements.len() - index;
                tracing::info!("Batch cancelled, {} element(s) skipped", report.skipped);
                break;
            }

            let path: PathBuf = transfer::destination_path(dir, element);
            match self.download_element(element, &path) {
                Ok(_) => report.downloaded.push(path),
                Err(e) => {
                    tracing::warn!("Download of {} failed: {}", element.id, e);
                    report.failed.push(BatchFailure {
                        element: element.clone(),
                        code: e.code(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Delete `element` from the handset
    pub fn delete_element(&mut self, element: &PhoneElement) -> Result<(), PhoneError> {
        self.ensure_open()?;
        check_element(element)?;
        let reply = self.executor.execute(&commands::delete_element(&element.id), &[]);
        expect_ok(&reply)
    }

    /// All alarms (`AT+CALA?`)
    pub fn list_alarms(&mut self) -> Result<Vec<PhoneAlarm>, PhoneError> {
        self.ensure_open()?;
        let reply = self.executor.execute(commands::ALARM_LIST, &[]);
        expect_ok(&reply)?;
        Ok(PhoneAlarm::parse_all(&reply))
    }

    /// Alarm index range the handset supports (`AT+CALA=?`)
    pub fn alarm_slots(&mut self) -> Result<RangeInclusive<u32>, PhoneError> {
        self.ensure_open()?;
        let reply = self.executor.execute(commands::ALARM_TEST, &[]);
        expect_ok(&reply)?;
        parse_alarm_slots(&reply).ok_or_else(|| PhoneError::Malformed(reply.trim().to_string()))
    }

    /// Set an alarm
    pub fn add_alarm(&mut self, alarm: &PhoneAlarm) -> Result<(), PhoneError> {
        self.ensure_open()?;
        if !alarm.one_time && !alarm.for_all_days && alarm.days.as_ref().map_or(true, |d| d.is_empty()) {
            return Err(PhoneError::InvalidArgument("recurring alarm without days".to_string()));
        }
        let reply = self.executor.execute(&commands::set_alarm(&alarm.to_wire()), &[]);
        expect_ok(&reply)
    }

    /// Delete alarm `n`
    pub fn delete_alarm(&mut self, n: u32) -> Result<(), PhoneError> {
        self.ensure_open()?;
        let reply = self.executor.execute(&commands::delete_alarm(n), &[]);
        expect_ok(&reply)
    }

    fn text_mode(&mut self) -> Result<(), PhoneError> {
        let reply = self.executor.execute(commands::SMS_TEXT_MODE, &[]);
        expect_ok(&reply)
    }

    /// Every stored SMS
    pub fn list_messages(&mut self) -> Result<Vec<PhoneMessage>, PhoneError> {
        self.ensure_open()?;
        self.text_mode()?;
        let reply = self.executor.execute(commands::SMS_LIST, &[]);
        expect_ok(&reply)?;
        Ok(PhoneMessage::parse_list(&reply))
    }

    /// SMS at index `n`
    pub fn read_message(&mut self, n: u32) -> Result<PhoneMessage, PhoneError> {
        self.ensure_open()?;
        self.text_mode()?;
        let reply = self.executor.execute(&commands::read_message(n), &[]);
        expect_ok(&reply)?;
        PhoneMessage::parse_read(n, &reply).ok_or_else(|| PhoneError::Malformed(reply.trim().to_string()))
    }

    /// Delete SMS `n`
    pub fn delete_message(&mut self, n: u32) -> Result<(), PhoneError> {
        self.ensure_open()?;
        let reply = self.executor.execute(&commands::delete_message(n), &[]);
        expect_ok(&reply)
    }

    /// Send an SMS; returns the network message reference
    pub fn send_message(&mut self, message: &PhoneMessage) -> Result<u32, PhoneError> {
        self.ensure_open()?;
        let recipient = message
            .recipient_or_sender
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| PhoneError::InvalidArgument("missing recipient".to_string()))?;
        check_argument(recipient)?;
        let body = message
            .body
            .as_deref()
            .ok_or_else(|| PhoneError::InvalidArgument("missing body".to_string()))?;
        if body.contains(char::from(commands::CTRL_Z)) || body.contains('\u{1b}') {
            return Err(PhoneError::InvalidArgument("body contains control characters".to_string()));
        }

        self.text_mode()?;
        let reply = self
            .executor
            .execute(&commands::send_message(recipient), &[commands::SMS_PROMPT]);
        expect_marker(&reply, commands::SMS_PROMPT)?;

        let mut payload = string_to_latin1(body);
        payload.push(commands::CTRL_Z);
        self.executor.write_raw(&payload)?;

        let reply = self.executor.read_reply(&[]).text();
        expect_ok(&reply)?;
        let reference = parse_send_reference(&reply)
            .ok_or_else(|| PhoneError::Malformed(reply.trim().to_string()))?;
        tracing::info!("SMS to {} sent, reference {}", recipient, reference);
        Ok(reference)
    }

    /// Dial `number`. Voice calls expect `OK`, data calls `CONNECT`.
    pub fn dial(&mut self, number: &str, voice: bool, mode: DialMode) -> Result<(), PhoneError> {
        self.ensure_open()?;
        let number = number.trim();
        if number.is_empty() || !number.chars().all(is_dial_char) {
            return Err(PhoneError::InvalidArgument(format!("bad number '{number}'")));
        }
        let reply = self.executor.execute(
            &commands::dial(number, voice, mode),
            &[commands::CONNECT],
        );
        if voice {
            expect_ok(&reply)
        } else {
            expect_marker(&reply, commands::CONNECT)
        }
    }

    /// End the current call
    pub fn hangup(&mut self) -> Result<(), PhoneError> {
        self.ensure_open()?;
        let reply = self.executor.execute(commands::HANGUP, &[]);
        expect_ok(&reply)
    }

    /// Capability lines for an element type
    pub fn capabilities(&mut self, element_type: &str) -> Result<Vec<String>, PhoneError> {
        self.ensure_open()?;
        if element_type.trim().is_empty() {
            return Err(PhoneError::InvalidArgument("empty element type".to_string()));
        }
        check_argument(element_type)?;
        let reply = self
            .executor
            .execute(&commands::capabilities(element_type.trim()), &[]);
        if expect_marker(&reply, commands::CONNECT).is_err() {
            expect_ok(&reply)?;
        }
        Ok(parse_capabilities(&reply))
    }

    /// Received signal strength
    pub fn signal_power(&mut self) -> Result<SignalQuality, PhoneError> {
        self.ensure_open()?;
        let reply = self.executor.execute(commands::SIGNAL_QUALITY, &[]);
        expect_ok(&reply)?;
        SignalQuality::parse(&reply).ok_or_else(|| PhoneError::Malformed(reply.trim().to_string()))
    }

    /// SIM lock state; `None` when the handset reports something unknown
    pub fn pin_status(&mut self) -> Result<Option<PinStatus>, PhoneError> {
        self.ensure_open()?;
        let reply = self.executor.execute(commands::PIN_QUERY, &[]);
        expect_ok(&reply)?;
        Ok(parse_pin_reply(&reply))
    }

    /// Enter the PIN, or a PUK plus a new PIN
    pub fn send_pin(&mut self, pin: &str, new_pin: Option<&str>) -> Result<(), PhoneError> {
        self.ensure_open()?;
        check_code(pin)?;
        if let Some(new_pin) = new_pin {
            check_code(new_pin)?;
        }
        let reply = self.executor.execute(&commands::enter_pin(pin, new_pin), &[]);
        expect_ok(&reply)
    }

    /// Switch the handset off
    pub fn power_off(&mut self) -> Result<(), PhoneError> {
        self.ensure_open()?;
        let reply = self.executor.execute(commands::POWER_OFF, &[]);
        expect_ok(&reply)?;
        tracing::info!("Phone switched off");
        Ok(())
    }

    /// Identity of the handset. Fields the handset refuses stay empty.
    pub fn device_info(&mut self) -> Result<DeviceInfo, PhoneError> {
        self.ensure_open()?;
        let mut answered = false;
        let mut query = |executor: &mut CommandExecutor<C>, command: &str| {
            let reply = executor.execute(command, &[]);
            answered |= !reply.trim().is_empty();
            expect_ok(&reply).ok().map(|()| reply)
        };

        let firmware = query(&mut self.executor, commands::FIRMWARE_VERSION);
        let model = query(&mut self.executor, commands::DEVICE_TYPE);
        let revision = query(&mut self.executor, commands::REVISION);
        let imei = query(&mut self.executor, commands::SERIAL_NUMBER);
        let numbers = query(&mut self.executor, commands::SUBSCRIBER_NUMBERS);

        if !answered {
            return Err(PhoneError::NoAnswer);
        }
        Ok(DeviceInfo {
            firmware: firmware.as_deref().and_then(parse_info_line),
            model: model.as_deref().and_then(parse_info_line),
            revision: revision.as_deref().and_then(parse_info_line),
            imei: imei.as_deref().and_then(parse_info_line),
            subscriber_numbers: numbers
                .as_deref()
                .map(parse_subscriber_numbers)
                .unwrap_or_default(),
        })
    }
}

impl<C: SerialChannel> Drop for PhoneSession<C> {
    fn drop(&mut self) {
        self.close();
    }
}

fn check_element(element: &PhoneElement) -> Result<(), PhoneError> {
    if element.id.trim().is_empty() || !is_quotable(&element.id) {
        return Err(PhoneError::InvalidElement(format!("'{}'", element.id)));
    }
    Ok(())
}

/// Text placed between quotes on the command line
fn is_quotable(value: &str) -> bool {
    !value.chars().any(|c| c == '"' || c.is_control())
}

fn check_argument(value: &str) -> Result<(), PhoneError> {
    if is_quotable(value) {
        Ok(())
    } else {
        Err(PhoneError::InvalidArgument(format!("{value:?} cannot be quoted")))
    }
}

fn check_code(code: &str) -> Result<(), PhoneError> {
    if (4..=8).contains(&code.len()) && code.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(PhoneError::InvalidArgument("PIN/PUK must be 4 to 8 digits".to_string()))
    }
}

fn is_dial_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '+' | '*' | '#' | ',' | 'p' | 'P' | 'w' | 'W')
}
