//! Command execution with bounded retry
//!
//! Slow handset firmware sometimes swallows a command or stops answering
//! until the port is re-opened. Every exchange therefore waits a short
//! settle delay, and an empty reply triggers a fresh open of the same port
//! followed by a retry, up to `max_trials` attempts.

use super::reader::{string_to_latin1, RawReply, ResponseReader};
use crate::core::transport::{PortConfig, SerialChannel, TransportError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and retry parameters of the AT exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    /// How long the line may stay silent before a reply is considered complete
    pub read_timeout_ms: u64,
    /// Pause before each attempt
    pub settle_delay_ms: u64,
    /// Attempts per command, and per upload handshake
    pub max_trials: u32,
    /// Size of the raw writes used to stream upload content
    pub upload_chunk_size: usize,
}

impl ExchangeSettings {
    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Settle delay as a duration
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 5000,
            settle_delay_ms: 250,
            max_trials: 3,
            upload_chunk_size: 512,
        }
    }
}

/// Sends AT commands over a channel and collects the replies
pub struct CommandExecutor<C: SerialChannel> {
    channel: C,
    config: Option<PortConfig>,
    settings: ExchangeSettings,
    reopen_events: u32,
}

impl<C: SerialChannel> CommandExecutor<C> {
    /// Create an executor around a closed channel
    pub fn new(channel: C, settings: ExchangeSettings) -> Self {
        Self {
            channel,
            config: None,
            settings,
            reopen_events: 0,
        }
    }

    /// Validate `config` and open the channel with it
    pub fn open(&mut self, config: PortConfig) -> Result<(), TransportError> {
        config.validate()?;
        self.channel.open(&config)?;
        self.config = Some(config);
        Ok(())
    }

    /// Release the channel. Idempotent.
    pub fn close(&mut self) {
        self.channel.close();
        self.config = None;
    }

    /// Check if a port configuration is active
    pub fn is_open(&self) -> bool {
        self.config.is_some() && self.channel.is_open()
    }

    /// Active port configuration
    pub fn config(&self) -> Option<&PortConfig> {
        self.config.as_ref()
    }

    /// Exchange settings
    pub fn settings(&self) -> &ExchangeSettings {
        &self.settings
    }

    /// Number of times the channel has been re-opened by retries
    pub fn reopen_events(&self) -> u32 {
        self.reopen_events
    }

    /// Borrow the underlying channel
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Mutably borrow the underlying channel
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Close and open the channel again with the same parameters
    pub fn reopen(&mut self) -> bool {
        let Some(config) = self.config.clone() else {
            return false;
        };
        self.reopen_events += 1;
        self.channel.close();
        match self.channel.open(&config) {
            Ok(()) => {
                tracing::warn!("Re-opened {}", config.port);
                true
            }
            Err(e) => {
                tracing::warn!("Re-opening {} failed: {}", config.port, e);
                false
            }
        }
    }

    /// Send one AT command and return the decoded reply.
    ///
    /// The text is returned even when every attempt came back empty; callers
    /// look for `OK` / `ERROR` themselves.
    pub fn execute(&mut self, command: &str, extra_terminators: &[&str]) -> String {
        self.execute_raw(command, extra_terminators).text()
    }

    /// Like [`execute`](Self::execute) but keeps the raw bytes
    pub fn execute_raw(&mut self, command: &str, extra_terminators: &[&str]) -> RawReply {
        tracing::debug!("> {}", command);
        let mut line = string_to_latin1(command);
        line.push(b'\r');
        self.transact(&line, extra_terminators)
    }

    /// Send pre-encoded bytes with the same retry policy as commands
    pub fn send_raw_and_retry(&mut self, bytes: &[u8], extra_terminators: &[&str]) -> RawReply {
        tracing::debug!("> {} raw bytes", bytes.len());
        self.transact(bytes, extra_terminators)
    }

    /// Single write without reading or retrying
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.channel.write(bytes)
    }

    /// Read one reply without sending anything
    pub fn read_reply(&mut self, extra_terminators: &[&str]) -> RawReply {
        ResponseReader::new(
            &mut self.channel,
            self.settings.read_timeout(),
            extra_terminators,
        )
        .read()
    }

    fn transact(&mut self, bytes: &[u8], extra_terminators: &[&str]) -> RawReply {
        let trials = self.settings.max_trials.max(1);
        let mut reply = RawReply::default();

        for attempt in 1..=trials {
            std::thread::sleep(self.settings.settle_delay());

            match self.channel.write(bytes) {
                Ok(()) => {
                    reply = self.read_reply(extra_terminators);
                    if !reply.is_blank() {
                        tracing::debug!("< {} bytes (attempt {})", reply.len(), attempt);
                        return reply;
                    }
                    tracing::warn!("No answer (attempt {}/{})", attempt, trials);
                }
                Err(e) => {
                    tracing::warn!("Write failed (attempt {}/{}): {}", attempt, trials, e);
                }
            }

            if attempt < trials {
                self.reopen();
            }
        }

        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::simulator::{ChannelEvent, VirtualPhone};

    fn fast_settings() -> ExchangeSettings {
        ExchangeSettings {
            read_timeout_ms: 10,
            settle_delay_ms: 0,
            max_trials: 3,
            upload_chunk_size: 16,
        }
    }

    fn executor(phone: VirtualPhone) -> CommandExecutor<VirtualPhone> {
        let mut executor = CommandExecutor::new(phone, fast_settings());
        executor.open(PortConfig::new("virtual", 115_200)).unwrap();
        executor
    }

    #[test]
    fn test_execute_ok() {
        let mut executor = executor(VirtualPhone::new());
        let reply = executor.execute("AT", &[]);
        assert!(reply.contains("OK"));
        assert_eq!(executor.reopen_events(), 0);
    }

    #[test]
    fn test_retry_after_two_silent_attempts() {
        let phone = VirtualPhone::new();
        phone.silence_next(2);
        let mut executor = executor(phone);

        let reply = executor.execute("AT", &[]);
        assert!(reply.contains("OK"));
        assert_eq!(executor.reopen_events(), 2);

        let log = executor.channel().log();
        let writes = log.iter().filter(|e| matches!(e, ChannelEvent::Write(_))).count();
        let opens = log.iter().filter(|e| matches!(e, ChannelEvent::Open)).count();
        assert_eq!(writes, 3);
        assert_eq!(opens, 3);
    }

    #[test]
    fn test_all_attempts_silent() {
        let phone = VirtualPhone::new();
        phone.silence_next(3);
        let mut executor = executor(phone);

        let reply = executor.execute("AT", &[]);
        assert!(reply.trim().is_empty());
        assert_eq!(executor.reopen_events(), 2);
    }

    #[test]
    fn test_write_failure_counts_as_attempt() {
        let phone = VirtualPhone::new();
        phone.fail_writes(1);
        let mut executor = executor(phone);

        let reply = executor.execute("AT", &[]);
        assert!(reply.contains("OK"));
        assert_eq!(executor.reopen_events(), 1);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let mut executor = CommandExecutor::new(VirtualPhone::new(), fast_settings());
        let result = executor.open(PortConfig::new("virtual", 1234));
        assert!(matches!(result, Err(TransportError::InvalidConfiguration(_))));
        assert!(!executor.is_open());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut executor = executor(VirtualPhone::new());
        executor.close();
        executor.close();
        assert!(!executor.is_open());
        assert!(!executor.reopen());
    }
}
