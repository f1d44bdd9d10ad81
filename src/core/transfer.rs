//! Object transfer to and from the handset
//!
//! Upload is a seven step `AT+KDOBJ` handshake:
//!
//! 1. reset any transfer in progress
//! 2. open a transfer
//! 3. announce the name length, wait for `CONNECT`
//! 4. send the raw name, wait for `OK`
//! 5. announce type and content length, wait for `CONNECT`
//! 6. stream the content in fixed size chunks, wait for `OK`
//! 7. close the transfer
//!
//! A failing step re-opens the port and restarts the whole handshake, up to
//! the exchange trial limit. Downloads are a single retrieval command whose
//! envelope is unwrapped by the [`FrameExtractor`](crate::core::protocol::FrameExtractor).

use crate::core::at::{commands, string_to_latin1, CommandExecutor};
use crate::core::phone::{upload_type_for_extension, PhoneElement};
use crate::core::session::{expect_marker, PhoneError};
use crate::core::transport::SerialChannel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Upload handshake step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadStage {
    Reset,
    Init,
    NameLength,
    Name,
    ContentHeader,
    Content,
    Close,
}

impl UploadStage {
    /// Stages in handshake order
    pub const ALL: [UploadStage; 7] = [
        UploadStage::Reset,
        UploadStage::Init,
        UploadStage::NameLength,
        UploadStage::Name,
        UploadStage::ContentHeader,
        UploadStage::Content,
        UploadStage::Close,
    ];

    /// Result code reported when this stage fails (-1..=-7)
    pub fn code(&self) -> i32 {
        match self {
            UploadStage::Reset => -1,
            UploadStage::Init => -2,
            UploadStage::NameLength => -3,
            UploadStage::Name => -4,
            UploadStage::ContentHeader => -5,
            UploadStage::Content => -6,
            UploadStage::Close => -7,
        }
    }

    /// Stage for a result code
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn name(&self) -> &'static str {
        match self {
            UploadStage::Reset => "transfer reset",
            UploadStage::Init => "transfer init",
            UploadStage::NameLength => "name length",
            UploadStage::Name => "name",
            UploadStage::ContentHeader => "content header",
            UploadStage::Content => "content",
            UploadStage::Close => "transfer close",
        }
    }
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A local file checked and loaded for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// Name the handset will store
    pub name: String,
    /// Type tag announced in the handshake
    pub object_type: &'static str,
    /// File content
    pub content: Vec<u8>,
}

impl UploadFile {
    /// Validate and load `path`. The stored name is `new_name`, or the file
    /// stem when none is given.
    pub fn from_path(path: &Path, new_name: Option<&str>) -> Result<Self, PhoneError> {
        if !path.is_file() {
            return Err(PhoneError::InvalidFile(path.display().to_string()));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let object_type = upload_type_for_extension(extension)
            .ok_or_else(|| PhoneError::UnsupportedFile(extension.to_string()))?;

        let content = std::fs::read(path)
            .map_err(|e| PhoneError::InvalidFile(format!("{}: {}", path.display(), e)))?;
        if content.is_empty() {
            return Err(PhoneError::InvalidFile(format!("{}: empty file", path.display())));
        }

        let name = match new_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string(),
        };
        if name.is_empty() {
            return Err(PhoneError::InvalidArgument("empty object name".to_string()));
        }

        Ok(Self {
            name,
            object_type,
            content,
        })
    }
}

/// Outcome of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    pub name: String,
    pub object_type: String,
    pub bytes: u64,
    /// Handshakes needed, 1 when the first one went through
    pub attempts: u32,
}

/// Why one handshake attempt stopped
#[derive(Debug)]
struct StageFailure {
    stage: UploadStage,
    silent: bool,
}

impl StageFailure {
    fn from_error(stage: UploadStage, error: &PhoneError) -> Self {
        Self {
            stage,
            silent: matches!(error, PhoneError::NoAnswer),
        }
    }
}

/// Run the upload handshake with whole-handshake retry.
///
/// When every attempt fails, the last stage that was explicitly refused is
/// reported; if the handset went silent instead the result is
/// [`PhoneError::TrialsExceeded`].
pub fn upload<C: SerialChannel>(
    executor: &mut CommandExecutor<C>,
    file: &UploadFile,
) -> Result<UploadReport, PhoneError> {
    let trials = executor.settings().max_trials.max(1);
    let mut last_failure = None;

    for attempt in 1..=trials {
        match upload_attempt(executor, file) {
            Ok(()) => {
                tracing::info!(
                    "Uploaded {} ({} bytes, {}) in {} attempt(s)",
                    file.name,
                    file.content.len(),
                    file.object_type,
                    attempt
                );
                return Ok(UploadReport {
                    name: file.name.clone(),
                    object_type: file.object_type.to_string(),
                    bytes: file.content.len() as u64,
                    attempts: attempt,
                });
            }
            Err(failure) => {
                tracing::warn!(
                    "Upload stage '{}' failed (attempt {}/{}{})",
                    failure.stage,
                    attempt,
                    trials,
                    if failure.silent { ", no answer" } else { "" }
                );
                last_failure = Some(failure);
                if attempt < trials {
                    executor.reopen();
                }
            }
        }
    }

    match last_failure {
        Some(failure) if !failure.silent => Err(PhoneError::Upload(failure.stage)),
        _ => Err(PhoneError::TrialsExceeded(trials)),
    }
}

fn upload_attempt<C: SerialChannel>(
    executor: &mut CommandExecutor<C>,
    file: &UploadFile,
) -> Result<(), StageFailure> {
    let stage_ok = |stage: UploadStage, reply: &str, marker: &str| {
        expect_marker(reply, marker).map_err(|e| StageFailure::from_error(stage, &e))
    };

    let reply = executor.execute(commands::TRANSFER_RESET, &[]);
    stage_ok(UploadStage::Reset, &reply, "OK")?;

    let reply = executor.execute(commands::TRANSFER_INIT, &[]);
    stage_ok(UploadStage::Init, &reply, "OK")?;

    let name = string_to_latin1(&file.name);
    let reply = executor.execute(
        &commands::transfer_name_length(name.len()),
        &[commands::CONNECT],
    );
    stage_ok(UploadStage::NameLength, &reply, commands::CONNECT)?;

    let reply = executor.send_raw_and_retry(&name, &[]).text();
    stage_ok(UploadStage::Name, &reply, "OK")?;

    let reply = executor.execute(
        &commands::transfer_content_header(file.object_type, file.content.len() as u64),
        &[commands::CONNECT],
    );
    stage_ok(UploadStage::ContentHeader, &reply, commands::CONNECT)?;

    let chunk_size = executor.settings().upload_chunk_size.max(1);
    let mut sent = 0usize;
    for chunk in file.content.chunks(chunk_size) {
        if let Err(e) = executor.write_raw(chunk) {
            tracing::warn!("Content write failed after {} bytes: {}", sent, e);
            return Err(StageFailure {
                stage: UploadStage::Content,
                silent: true,
            });
        }
        sent += chunk.len();
        tracing::trace!("Sent {}/{} content bytes", sent, file.content.len());
    }
    let reply = executor.read_reply(&[]).text();
    stage_ok(UploadStage::Content, &reply, "OK")?;

    let reply = executor.execute(commands::TRANSFER_CLOSE, &[]);
    stage_ok(UploadStage::Close, &reply, "OK")?;

    Ok(())
}

/// Cooperative cancellation flag shared between a caller and a running
/// operation
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the operation to stop before its next command
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One element a batch couldn't fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub element: PhoneElement,
    pub code: i32,
    pub message: String,
}

/// Outcome of a batch download
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Files written
    pub downloaded: Vec<PathBuf>,
    /// Elements that failed
    pub failed: Vec<BatchFailure>,
    /// Elements not attempted because the batch was cancelled
    pub skipped: usize,
}

impl BatchReport {
    /// Everything listed was fetched
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped == 0
    }
}

/// Destination for `element` inside `dir`; an existing file gets the
/// element id appended instead of being overwritten.
pub fn destination_path(dir: &Path, element: &PhoneElement) -> PathBuf {
    let path = dir.join(element.file_name());
    if !path.exists() {
        return path;
    }
    dir.join(format!(
        "{}_{}.{}",
        element.display_name,
        crate::core::phone::sanitize_name(&element.id),
        element.extension()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::at::ExchangeSettings;
    use crate::core::simulator::VirtualPhone;
    use crate::core::transport::PortConfig;
    use std::io::Write;

    fn executor(phone: VirtualPhone) -> CommandExecutor<VirtualPhone> {
        let settings = ExchangeSettings {
            read_timeout_ms: 10,
            settle_delay_ms: 0,
            max_trials: 3,
            upload_chunk_size: 4,
        };
        let mut executor = CommandExecutor::new(phone, settings);
        executor.open(PortConfig::new("virtual", 115_200)).unwrap();
        executor
    }

    fn jpeg_file(dir: &Path) -> PathBuf {
        let path = dir.join("beach photo.jpg");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&crate::core::simulator::sample_jpeg()).unwrap();
        path
    }

    #[test]
    fn test_stage_codes() {
        let codes: Vec<i32> = UploadStage::ALL.iter().map(UploadStage::code).collect();
        assert_eq!(codes, vec![-1, -2, -3, -4, -5, -6, -7]);
        assert_eq!(UploadStage::from_code(-5), Some(UploadStage::ContentHeader));
        assert_eq!(UploadStage::from_code(-8), None);
    }

    #[test]
    fn test_upload_file_validation() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.jpg");
        assert!(matches!(
            UploadFile::from_path(&missing, None),
            Err(PhoneError::InvalidFile(_))
        ));

        let exe = dir.path().join("tool.exe");
        std::fs::write(&exe, b"MZ").unwrap();
        assert!(matches!(
            UploadFile::from_path(&exe, None),
            Err(PhoneError::UnsupportedFile(_))
        ));

        let empty = dir.path().join("empty.mid");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(
            UploadFile::from_path(&empty, None),
            Err(PhoneError::InvalidFile(_))
        ));

        let file = UploadFile::from_path(&jpeg_file(dir.path()), None).unwrap();
        assert_eq!(file.name, "beach photo");
        assert_eq!(file.object_type, "JPEG");

        let renamed = UploadFile::from_path(&jpeg_file(dir.path()), Some("Beach")).unwrap();
        assert_eq!(renamed.name, "Beach");
    }

    #[test]
    fn test_upload_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let file = UploadFile::from_path(&jpeg_file(dir.path()), Some("Beach")).unwrap();
        let phone = VirtualPhone::new();
        let mut executor = executor(phone.clone());

        let report = upload(&mut executor, &file).unwrap();
        assert_eq!(report.attempts, 1);
        assert_eq!(report.bytes, file.content.len() as u64);

        let stored = phone.element_named("Beach").unwrap();
        assert_eq!(stored.element_type, "JPEG");
        assert_eq!(stored.data, file.content);
        assert_eq!(
            phone.commands(),
            vec![
                "AT+KDOBJ=1,0".to_string(),
                "AT+KDOBJ=1,1".to_string(),
                "AT+KDOBJ=2,1,3,0,5".to_string(),
                format!("AT+KDOBJ=2,1,0,JPEG,{}", file.content.len()),
                "AT+KDOBJ=1,0".to_string(),
            ]
        );
    }

    #[test]
    fn test_rejected_stage_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = UploadFile::from_path(&jpeg_file(dir.path()), None).unwrap();
        let phone = VirtualPhone::new();
        phone.respond_to("AT+KDOBJ=2,1,0", b"\r\nERROR\r\n");
        let mut executor = executor(phone.clone());

        let err = upload(&mut executor, &file).unwrap_err();
        assert!(matches!(err, PhoneError::Upload(UploadStage::ContentHeader)));
        assert_eq!(err.code(), -5);
        assert_eq!(executor.reopen_events(), 2);
    }

    #[test]
    fn test_retry_recovers_from_one_refusal() {
        let dir = tempfile::tempdir().unwrap();
        let file = UploadFile::from_path(&jpeg_file(dir.path()), None).unwrap();
        let phone = VirtualPhone::new();
        phone.respond_once("AT+KDOBJ=1,1", b"\r\nERROR\r\n");
        let mut executor = executor(phone.clone());

        let report = upload(&mut executor, &file).unwrap();
        assert_eq!(report.attempts, 2);
        assert!(phone.element_named("beach photo").is_some());
    }

    #[test]
    fn test_silent_phone_exceeds_trials() {
        let dir = tempfile::tempdir().unwrap();
        let file = UploadFile::from_path(&jpeg_file(dir.path()), None).unwrap();
        let phone = VirtualPhone::new();
        phone.silence_next(u32::MAX);
        let mut executor = executor(phone);

        let err = upload(&mut executor, &file).unwrap_err();
        assert!(matches!(err, PhoneError::TrialsExceeded(3)));
        assert_eq!(err.code(), -10);
    }

    #[test]
    fn test_destination_path_avoids_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let element = PhoneElement::new("0011", "JPEG", "Holiday");
        let first = destination_path(dir.path(), &element);
        assert_eq!(first, dir.path().join("Holiday.jpg"));
        std::fs::write(&first, b"x").unwrap();
        assert_eq!(
            destination_path(dir.path(), &element),
            dir.path().join("Holiday_0011.jpg")
        );
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
