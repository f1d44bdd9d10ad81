//! Background operations over a shared session
//!
//! Every public operation is spawned as its own blocking task. The task
//! takes the session lock, opens the port, runs the operation, closes the
//! port and releases the lock, so operations issued concurrently reach the
//! wire one after the other and never interleave their commands.
//!
//! Completion is reported twice: through the returned [`OperationHandle`]
//! and through the `on_done` callback, which fires exactly once per
//! operation with an [`OperationReport`].
//!
//! ## Example
//!
//! ```no_run
//! use phonelink_core::core::orchestrator::Orchestrator;
//! use phonelink_core::core::at::ExchangeSettings;
//! use phonelink_core::core::transport::{PortConfig, SerialPortChannel};
//!
//! # async fn example() {
//! let orchestrator = Orchestrator::new(
//!     SerialPortChannel::new(),
//!     PortConfig::new("/dev/ttyUSB0", 115_200),
//!     ExchangeSettings::default(),
//! )
//! .on_done(|report| println!("{}: {}", report.operation, report.message));
//!
//! let signal = orchestrator.signal_power().join().await;
//! # }
//! ```

use crate::core::at::{DialMode, ExchangeSettings};
use crate::core::phone::{DeviceInfo, PhoneAlarm, PhoneElement, PhoneMessage, PinStatus, SignalQuality};
use crate::core::session::{PhoneError, PhoneSession};
use crate::core::transfer::{BatchReport, CancelToken, UploadReport};
use crate::core::transport::{PortConfig, SerialChannel};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

type DoneCallback = Arc<dyn Fn(&OperationReport) + Send + Sync>;

/// Outcome of one orchestrated operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReport {
    pub id: Uuid,
    pub operation: String,
    /// 0 on success, otherwise [`PhoneError::code`]
    pub code: i32,
    /// [`Orchestrator::describe`] of `code`
    pub message: String,
    /// Error text with details, when the operation failed
    pub detail: Option<String>,
}

impl OperationReport {
    fn new<T>(id: Uuid, operation: &str, result: &Result<T, PhoneError>) -> Self {
        let (code, detail) = match result {
            Ok(_) => (0, None),
            Err(e) => (e.code(), Some(e.to_string())),
        };
        Self {
            id,
            operation: operation.to_string(),
            code,
            message: describe(code).to_string(),
            detail,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Message for a result code
pub fn describe(code: i32) -> &'static str {
    match code {
        0 => "Operation completed",
        -1 => "Upload failed: the phone refused to reset the transfer",
        -2 => "Upload failed: the phone refused to start the transfer",
        -3 => "Upload failed: the phone refused the name length",
        -4 => "Upload failed: the phone refused the name",
        -5 => "Upload failed: the phone refused the file type or size",
        -6 => "Upload failed: the phone refused the file content",
        -7 => "Upload failed: the phone refused to close the transfer",
        -8 => "The phone did not answer",
        -9 => "The phone rejected the command",
        -10 => "Too many failed attempts",
        -11 => "No file data found in the phone's reply",
        -12 => "The file is missing or unreadable",
        -13 => "The phone does not accept this file type",
        -14 => "Invalid phone element",
        -15 => "Invalid argument",
        -16 => "Could not write the file",
        -17 => "The connection is not open",
        -18 => "Could not open the serial port",
        -19 => "Operation cancelled",
        -20 => "The phone's reply could not be understood",
        -21 => "The operation stopped unexpectedly",
        _ => "Unknown error",
    }
}

/// A running operation
pub struct OperationHandle<T> {
    id: Uuid,
    cancel: CancelToken,
    task: JoinHandle<Result<T, PhoneError>>,
}

impl<T> OperationHandle<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop before the next command is issued. A command already on the
    /// wire still runs to completion.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the result
    pub async fn join(self) -> Result<T, PhoneError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(PhoneError::Cancelled),
        }
    }
}

/// Runs session operations as background tasks with mutual exclusion
pub struct Orchestrator<C: SerialChannel + 'static> {
    session: Arc<Mutex<PhoneSession<C>>>,
    config: PortConfig,
    on_done: Option<DoneCallback>,
}

impl<C: SerialChannel + 'static> Orchestrator<C> {
    /// Create an orchestrator; the port is only opened while an operation runs
    pub fn new(channel: C, config: PortConfig, settings: ExchangeSettings) -> Self {
        Self {
            session: Arc::new(Mutex::new(PhoneSession::new(channel, settings))),
            config,
            on_done: None,
        }
    }

    /// Set the completion callback
    #[must_use]
    pub fn on_done(mut self, callback: impl Fn(&OperationReport) + Send + Sync + 'static) -> Self {
        self.on_done = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// Message for a result code
    pub fn describe(code: i32) -> &'static str {
        describe(code)
    }

    /// Spawn `op` under the session lock
    pub fn spawn<T, F>(&self, operation: &str, op: F) -> OperationHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PhoneSession<C>, &CancelToken) -> Result<T, PhoneError> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let session = Arc::clone(&self.session);
        let config = self.config.clone();
        let on_done = self.on_done.clone();
        let operation = operation.to_string();

        let task = tokio::task::spawn_blocking(move || {
            let span = tracing::info_span!("operation", id = %id, name = %operation);
            let _guard = span.enter();

            let result = run_locked(&session, config, &token, op);
            let report = OperationReport::new(id, &operation, &result);
            match &report.detail {
                None => tracing::info!("{} finished", operation),
                Some(detail) => tracing::warn!("{} failed ({}): {}", operation, report.code, detail),
            }
            if let Some(callback) = on_done {
                callback(&report);
            }
            result
        });

        OperationHandle { id, cancel, task }
    }

    pub fn test_alive(&self) -> OperationHandle<()> {
        self.spawn("test_alive", |s, _| s.test_alive())
    }

    pub fn list_elements(&self, category: &str) -> OperationHandle<Vec<PhoneElement>> {
        let category = category.to_string();
        self.spawn("list_elements", move |s, _| s.list_elements(&category))
    }

    pub fn download_element(&self, element: PhoneElement, destination: PathBuf) -> OperationHandle<u64> {
        self.spawn("download_element", move |s, _| s.download_element(&element, &destination))
    }

    pub fn download_all(&self, category: &str, dir: PathBuf) -> OperationHandle<BatchReport> {
        let category = category.to_string();
        self.spawn("download_all", move |s, cancel| s.download_all(&category, &dir, cancel))
    }

    pub fn upload_file(&self, file: PathBuf, new_name: Option<String>) -> OperationHandle<UploadReport> {
        self.spawn("upload_file", move |s, _| s.upload_file(&file, new_name.as_deref()))
    }

    pub fn delete_element(&self, element: PhoneElement) -> OperationHandle<()> {
        self.spawn("delete_element", move |s, _| s.delete_element(&element))
    }

    pub fn list_alarms(&self) -> OperationHandle<Vec<PhoneAlarm>> {
        self.spawn("list_alarms", |s, _| s.list_alarms())
    }

    pub fn alarm_slots(&self) -> OperationHandle<RangeInclusive<u32>> {
        self.spawn("alarm_slots", |s, _| s.alarm_slots())
    }

    pub fn add_alarm(&self, alarm: PhoneAlarm) -> OperationHandle<()> {
        self.spawn("add_alarm", move |s, _| s.add_alarm(&alarm))
    }

    pub fn delete_alarm(&self, n: u32) -> OperationHandle<()> {
        self.spawn("delete_alarm", move |s, _| s.delete_alarm(n))
    }

    pub fn list_messages(&self) -> OperationHandle<Vec<PhoneMessage>> {
        self.spawn("list_messages", |s, _| s.list_messages())
    }

    pub fn read_message(&self, n: u32) -> OperationHandle<PhoneMessage> {
        self.spawn("read_message", move |s, _| s.read_message(n))
    }

    pub fn delete_message(&self, n: u32) -> OperationHandle<()> {
        self.spawn("delete_message", move |s, _| s.delete_message(n))
    }

    pub fn send_message(&self, message: PhoneMessage) -> OperationHandle<u32> {
        self.spawn("send_message", move |s, _| s.send_message(&message))
    }

    pub fn dial(&self, number: &str, voice: bool, mode: DialMode) -> OperationHandle<()> {
        let number = number.to_string();
        self.spawn("dial", move |s, _| s.dial(&number, voice, mode))
    }

    pub fn hangup(&self) -> OperationHandle<()> {
        self.spawn("hangup", |s, _| s.hangup())
    }

    pub fn capabilities(&self, element_type: &str) -> OperationHandle<Vec<String>> {
        let element_type = element_type.to_string();
        self.spawn("capabilities", move |s, _| s.capabilities(&element_type))
    }

    pub fn signal_power(&self) -> OperationHandle<SignalQuality> {
        self.spawn("signal_power", |s, _| s.signal_power())
    }

    pub fn pin_status(&self) -> OperationHandle<Option<PinStatus>> {
        self.spawn("pin_status", |s, _| s.pin_status())
    }

    pub fn send_pin(&self, pin: &str, new_pin: Option<&str>) -> OperationHandle<()> {
        let pin = pin.to_string();
        let new_pin = new_pin.map(str::to_string);
        self.spawn("send_pin", move |s, _| s.send_pin(&pin, new_pin.as_deref()))
    }

    pub fn power_off(&self) -> OperationHandle<()> {
        self.spawn("power_off", |s, _| s.power_off())
    }

    pub fn device_info(&self) -> OperationHandle<DeviceInfo> {
        self.spawn("device_info", |s, _| s.device_info())
    }
}

fn run_locked<C, T, F>(
    session: &Mutex<PhoneSession<C>>,
    config: PortConfig,
    cancel: &CancelToken,
    op: F,
) -> Result<T, PhoneError>
where
    C: SerialChannel,
    F: FnOnce(&mut PhoneSession<C>, &CancelToken) -> Result<T, PhoneError>,
{
    if cancel.is_cancelled() {
        return Err(PhoneError::Cancelled);
    }
    let mut session = session.lock();
    if cancel.is_cancelled() {
        return Err(PhoneError::Cancelled);
    }

    session.open(config)?;
    let result = panic::catch_unwind(AssertUnwindSafe(|| op(&mut *session, cancel)));
    session.close();
    result.unwrap_or_else(|payload| Err(PhoneError::Aborted(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::at::latin1_to_string;
    use crate::core::simulator::{ChannelEvent, VirtualPhone};

    fn settings() -> ExchangeSettings {
        ExchangeSettings {
            read_timeout_ms: 20,
            settle_delay_ms: 0,
            max_trials: 3,
            upload_chunk_size: 64,
        }
    }

    fn orchestrator(phone: &VirtualPhone) -> Orchestrator<VirtualPhone> {
        Orchestrator::new(phone.clone(), PortConfig::new("virtual", 115_200), settings())
    }

    /// Written command lines, grouped by open..close span
    fn wire_sessions(log: &[ChannelEvent]) -> Vec<Vec<String>> {
        let mut sessions = Vec::new();
        let mut current: Option<Vec<String>> = None;
        for event in log {
            match event {
                ChannelEvent::Open => current = Some(Vec::new()),
                ChannelEvent::Write(bytes) => {
                    let line = latin1_to_string(bytes).trim().to_string();
                    current.as_mut().expect("write outside open span").push(line);
                }
                ChannelEvent::Close => sessions.extend(current.take()),
            }
        }
        sessions
    }

    #[test]
    fn test_describe_covers_every_code() {
        for code in -21..=0 {
            assert_ne!(describe(code), "Unknown error", "code {code}");
        }
        assert_eq!(describe(-99), "Unknown error");
        assert_eq!(Orchestrator::<VirtualPhone>::describe(-19), "Operation cancelled");
    }

    #[tokio::test]
    async fn test_result_and_callback() {
        let phone = VirtualPhone::new();
        phone.set_signal(10, 2);
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let orchestrator = orchestrator(&phone).on_done(move |r| sink.lock().push(r.clone()));

        let handle = orchestrator.signal_power();
        let id = handle.id();
        let quality = handle.join().await.unwrap();
        assert_eq!(quality.rssi, 10);

        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].id, id);
        assert_eq!(reports[0].operation, "signal_power");
        assert!(reports[0].is_success());
        assert_eq!(reports[0].message, "Operation completed");
        assert!(!phone.is_open());
    }

    #[tokio::test]
    async fn test_panicking_operation_still_reports_and_closes() {
        let phone = VirtualPhone::new();
        phone.set_signal(12, 0);
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let orchestrator = orchestrator(&phone).on_done(move |r| sink.lock().push(r.clone()));

        let err = orchestrator
            .spawn("explode", |_, _| -> Result<(), PhoneError> { panic!("boom") })
            .join()
            .await
            .unwrap_err();
        assert_eq!(err.code(), -21);
        assert!(err.to_string().contains("boom"));
        assert!(!phone.is_open());

        assert_eq!(orchestrator.signal_power().join().await.unwrap().rssi, 12);
        let reports = reports.lock();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].code, -21);
        assert!(reports[1].is_success());
    }

    #[tokio::test]
    async fn test_failure_report_carries_code() {
        let phone = VirtualPhone::new();
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let orchestrator = orchestrator(&phone).on_done(move |r| sink.lock().push(r.clone()));

        let err = orchestrator.delete_alarm(4).join().await.unwrap_err();
        assert_eq!(err.code(), -9);

        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].code, -9);
        assert_eq!(reports[0].message, "The phone rejected the command");
        assert!(reports[0].detail.is_some());
    }

    #[tokio::test]
    async fn test_open_failure() {
        let phone = VirtualPhone::new();
        phone.fail_open(true);
        let orchestrator = orchestrator(&phone);
        let err = orchestrator.test_alive().join().await.unwrap_err();
        assert_eq!(err.code(), -18);
    }

    #[tokio::test]
    async fn test_operations_never_interleave() {
        let phone = VirtualPhone::with_sample_content();
        let orchestrator = orchestrator(&phone);

        let listing = orchestrator.list_elements("PICTURES");
        let signal = orchestrator.signal_power();
        let info = orchestrator.device_info();
        let alarms = orchestrator.list_alarms();

        assert_eq!(listing.join().await.unwrap().len(), 2);
        signal.join().await.unwrap();
        info.join().await.unwrap();
        assert_eq!(alarms.join().await.unwrap().len(), 1);

        let groups: [&[&str]; 4] = [
            &["AT+CSCS", "AT+KPSL"],
            &["AT+CSQ"],
            &["AT+KPSV", "ATIMEI", "AT+CGMR", "AT+CGSN", "AT+CNUM"],
            &["AT+CALA?"],
        ];
        let sessions = wire_sessions(&phone.log());
        assert_eq!(sessions.len(), 4);
        for writes in &sessions {
            let owner = groups
                .iter()
                .position(|g| g.iter().any(|p| writes[0].starts_with(p)))
                .expect("unknown command");
            assert!(
                writes
                    .iter()
                    .all(|w| groups[owner].iter().any(|p| w.starts_with(p))),
                "interleaved commands: {writes:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_lock() {
        let phone = VirtualPhone::new();
        phone.silence_next(u32::MAX);
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let orchestrator = orchestrator(&phone).on_done(move |r| sink.lock().push(r.clone()));

        let blocker = orchestrator.test_alive();
        while phone.log().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        let waiting = orchestrator.hangup();
        waiting.cancel();

        assert!(matches!(blocker.join().await, Err(PhoneError::NoAnswer)));
        assert!(matches!(waiting.join().await, Err(PhoneError::Cancelled)));

        let reports = reports.lock();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().any(|r| r.code == -19 && r.operation == "hangup"));
        assert!(!phone.commands().iter().any(|c| c == "ATH"));
    }

    #[tokio::test]
    async fn test_batch_download() {
        let phone = VirtualPhone::with_sample_content();
        let orchestrator = orchestrator(&phone);
        let dir = tempfile::tempdir().unwrap();

        let handle = orchestrator.download_all("PICTURES", dir.path().to_path_buf());
        let report = handle.join().await.unwrap();
        assert_eq!(report.downloaded.len(), 2);
        assert!(report.downloaded.iter().all(|p| p.exists()));
    }
}
