//! Synchronous AT transaction engine
//!
//! Every exchange with the modem goes through [`AtEngine`]: clear the
//! receive buffer, write the command, then poll the buffer until the
//! expected text, the `ERROR` marker, or the deadline. Methods take
//! `&mut self`, so only one transaction can ever be in flight.
//!
//! The wait is a sleep-and-poll loop, not a cancellable future: bytes that
//! arrive after a timeout stay in the buffer until the next transaction
//! clears it.

use core::fmt::Write as _;

use agrilink_hal::Clock;
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::Write;
use heapless::String;

use crate::config::LinkConfig;
use crate::rx::ReceiveBuffer;

use super::error::{PublishError, TransactionError};
use super::wait::{Wait, WaitState};

/// Capacity of one formatted AT command line
pub const CMD_CAPACITY: usize = 512;

/// Prompt the modem prints when it is ready for a raw payload
pub const PROMPT: &str = ">";

/// Reply to a quoted `AT+QMTPUB`
pub const QUOTED_PUBLISH_OK: &str = "OK";

/// Result code confirming a prompt-mode `AT+QMTPUBEX`
pub const PROMPT_PUBLISH_CONFIRM: &str = "+QMTPUBEX: 0,0,0";

/// Command line buffer
pub type Command = String<CMD_CAPACITY>;

/// AT command transaction engine
///
/// Owns the UART transmit half and borrows the receive buffer the UART
/// interrupt fills.
pub struct AtEngine<'a, Tx, C, D, const N: usize> {
    rx: &'a ReceiveBuffer<N>,
    tx: Tx,
    clock: C,
    delay: D,
    poll_interval_ms: u32,
    prompt_timeout_ms: u32,
    publish_timeout_ms: u32,
}

impl<'a, Tx, C, D, const N: usize> AtEngine<'a, Tx, C, D, N>
where
    Tx: Write,
    C: Clock,
    D: DelayNs,
{
    pub fn new(rx: &'a ReceiveBuffer<N>, tx: Tx, clock: C, delay: D, config: &LinkConfig) -> Self {
        Self {
            rx,
            tx,
            clock,
            delay,
            poll_interval_ms: config.poll_interval_ms.max(1),
            prompt_timeout_ms: config.prompt_timeout_ms,
            publish_timeout_ms: config.publish_timeout_ms,
        }
    }

    /// The receive buffer this engine reads from
    pub fn rx(&self) -> &'a ReceiveBuffer<N> {
        self.rx
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Sleep without touching the modem
    pub async fn pause(&mut self, ms: u32) {
        self.delay.delay_ms(ms).await;
    }

    /// Throw away anything the modem sent since the last transaction
    pub fn drain(&self) {
        let stale = self.rx.available_len();
        if stale > 0 {
            debug!("Draining {} stale bytes", stale);
        }
        self.rx.clear();
    }

    /// Send `cmd` followed by `\r\n` and wait for `expect`
    ///
    /// On success the receive buffer is left empty for the next transaction.
    pub async fn send_and_wait(
        &mut self,
        cmd: &str,
        expect: &str,
        timeout_ms: u32,
    ) -> Result<(), TransactionError> {
        debug!("AT > {} (expect '{}', {} ms)", cmd, expect, timeout_ms);
        self.rx.clear();
        self.write_all(cmd.as_bytes()).await?;
        self.write_all(b"\r\n").await?;
        self.flush().await?;
        let result = self.await_reply(expect, timeout_ms).await;
        match result {
            Ok(()) => trace!("AT < '{}' ok", expect),
            Err(e) => warn!("AT command '{}' failed: {}", cmd, e),
        }
        result
    }

    /// Format a command into the command buffer and run it
    pub async fn send_command(
        &mut self,
        args: core::fmt::Arguments<'_>,
        expect: &str,
        timeout_ms: u32,
    ) -> Result<(), TransactionError> {
        let mut cmd = Command::new();
        cmd.write_fmt(args).map_err(|_| {
            error!("AT command exceeds {} bytes", CMD_CAPACITY);
            TransactionError::CommandTooLong
        })?;
        self.send_and_wait(&cmd, expect, timeout_ms).await
    }

    /// Publish with the payload as a quoted `AT+QMTPUB` argument
    ///
    /// Only valid for payloads without quotes, line breaks or Ctrl-Z.
    pub async fn publish_quoted(
        &mut self,
        topic: &str,
        payload: &str,
        expect: &str,
    ) -> Result<(), PublishError> {
        let mut cmd = Command::new();
        write!(cmd, "AT+QMTPUB=0,0,0,0,\"{}\",\"{}\"", topic, payload)
            .map_err(|_| PublishError::Format)?;
        let timeout_ms = self.publish_timeout_ms;
        self.send_and_wait(&cmd, expect, timeout_ms)
            .await
            .map_err(PublishError::Command)
    }

    /// Publish with an explicit length: wait for `>`, write the payload raw,
    /// then wait for `confirm`
    pub async fn publish_with_prompt(
        &mut self,
        topic: &str,
        payload: &str,
        confirm: &str,
    ) -> Result<(), PublishError> {
        let mut cmd = Command::new();
        write!(cmd, "AT+QMTPUBEX=0,0,0,0,\"{}\",{}", topic, payload.len())
            .map_err(|_| PublishError::Format)?;

        let prompt_timeout_ms = self.prompt_timeout_ms;
        self.send_and_wait(&cmd, PROMPT, prompt_timeout_ms)
            .await
            .map_err(|e| {
                warn!("No publish prompt for '{}': {}", topic, e);
                PublishError::Command(e)
            })?;

        self.rx.clear();
        self.write_all(payload.as_bytes())
            .await
            .map_err(PublishError::Confirm)?;
        self.flush().await.map_err(PublishError::Confirm)?;

        let publish_timeout_ms = self.publish_timeout_ms;
        self.await_reply(confirm, publish_timeout_ms)
            .await
            .map_err(|e| {
                warn!("Payload sent to '{}' but not confirmed: {}", topic, e);
                PublishError::Confirm(e)
            })
    }

    async fn write_all(&mut self, mut bytes: &[u8]) -> Result<(), TransactionError> {
        while !bytes.is_empty() {
            let written = self
                .tx
                .write(bytes)
                .await
                .map_err(|_| TransactionError::Transport)?;
            if written == 0 {
                return Err(TransactionError::Transport);
            }
            bytes = &bytes[written..];
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TransactionError> {
        self.tx
            .flush()
            .await
            .map_err(|_| TransactionError::Transport)
    }

    async fn await_reply(&mut self, expect: &str, timeout_ms: u32) -> Result<(), TransactionError> {
        let mut wait = Wait::new(expect, self.clock.now_ms(), timeout_ms);
        // only re-scan when the ISR delivered something new
        let mut scanned_len = usize::MAX;
        loop {
            let now_ms = self.clock.now_ms();
            let available = self.rx.available_len();
            let state = if available != scanned_len {
                scanned_len = available;
                let frame = self.rx.snapshot();
                wait.poll(frame.as_text(), now_ms)
            } else {
                wait.poll("", now_ms)
            };

            match state {
                WaitState::Pending { .. } => self.delay.delay_ms(self.poll_interval_ms).await,
                WaitState::Done => {
                    self.rx.clear();
                    return Ok(());
                }
                WaitState::Failed => {
                    self.rx.clear();
                    return Err(TransactionError::ModemError);
                }
                WaitState::TimedOut => {
                    self.rx.clear();
                    return Err(TransactionError::Timeout);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimClock, SimModem};
    use embassy_futures::block_on;

    const TIMEOUT: u32 = 300;

    #[test]
    fn test_send_and_wait_success_leaves_buffer_clear() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<256> = ReceiveBuffer::new();
        let modem = SimModem::new(&rx, &clock);
        modem.expect("AT\r\n", &[(20, "\r\nOK\r\n")]);

        let mut engine = modem.engine(&LinkConfig::default());
        let result = block_on(engine.send_and_wait("AT", "OK", TIMEOUT));

        assert_eq!(result, Ok(()));
        assert_eq!(rx.available_len(), 0);
        assert_eq!(modem.written(), "AT\r\n");
    }

    #[test]
    fn test_stale_bytes_cleared_before_send() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<256> = ReceiveBuffer::new();
        // left over from an earlier timed-out exchange
        for b in b"\r\n+CGATT: 1\r\n" {
            rx.on_byte_received(*b, 0);
        }
        let modem = SimModem::new(&rx, &clock);
        modem.expect("AT+CGATT?", &[(10, "\r\n+CGATT: 0\r\n\r\nOK\r\n")]);

        let mut engine = modem.engine(&LinkConfig::default());
        let result = block_on(engine.send_and_wait("AT+CGATT?", "+CGATT: 1", TIMEOUT));
        assert_eq!(result, Err(TransactionError::Timeout));
    }

    #[test]
    fn test_error_marker_fails_fast() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<256> = ReceiveBuffer::new();
        let modem = SimModem::new(&rx, &clock);
        modem.expect("AT+CIMI", &[(15, "\r\n+CME ERROR: 10\r\n")]);

        let mut engine = modem.engine(&LinkConfig::default());
        let result = block_on(engine.send_and_wait("AT+CIMI", "OK", 5_000));

        assert_eq!(result, Err(TransactionError::ModemError));
        assert!(clock.now() < 100);
    }

    #[test]
    fn test_timeout_bounds() {
        let config = LinkConfig::default();
        let poll = u64::from(config.poll_interval_ms);
        for timeout in [1u32, 7, 50, 333, 1_000] {
            let clock = SimClock::new();
            clock.set(12_345);
            let rx: ReceiveBuffer<64> = ReceiveBuffer::new();
            let modem = SimModem::new(&rx, &clock);

            let mut engine = modem.engine(&config);
            let result = block_on(engine.send_and_wait("AT", "OK", timeout));

            assert_eq!(result, Err(TransactionError::Timeout));
            let elapsed = clock.now() - 12_345;
            assert!(elapsed >= u64::from(timeout), "returned early at {}", elapsed);
            assert!(
                elapsed <= u64::from(timeout) + poll,
                "returned late at {}",
                elapsed
            );
        }
    }

    #[test]
    fn test_reply_split_across_polls() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<256> = ReceiveBuffer::new();
        let modem = SimModem::new(&rx, &clock);
        modem.expect("AT+QMTOPEN", &[(5, "\r\nOK\r\n"), (400, "\r\n+QMTOPEN: 0,0\r\n")]);

        let mut engine = modem.engine(&LinkConfig::default());
        let result = block_on(engine.send_and_wait(
            "AT+QMTOPEN=0,\"mqtts.heclouds.com\",1883",
            "+QMTOPEN: 0,0",
            1_000,
        ));
        assert_eq!(result, Ok(()));
        assert!(clock.now() >= 400);
    }

    #[test]
    fn test_send_command_formats_line() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<256> = ReceiveBuffer::new();
        let modem = SimModem::new(&rx, &clock);
        modem.expect("AT+QMTCFG", &[(5, "\r\nOK\r\n")]);

        let mut engine = modem.engine(&LinkConfig::default());
        let result = block_on(engine.send_command(
            format_args!("AT+QMTCFG=\"version\",0,{}", 4),
            "OK",
            TIMEOUT,
        ));
        assert_eq!(result, Ok(()));
        assert_eq!(modem.written(), "AT+QMTCFG=\"version\",0,4\r\n");
    }

    #[test]
    fn test_send_command_too_long() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<64> = ReceiveBuffer::new();
        let modem = SimModem::new(&rx, &clock);
        let long = [b'x'; CMD_CAPACITY + 1];
        let long = core::str::from_utf8(&long).unwrap();

        let mut engine = modem.engine(&LinkConfig::default());
        let result = block_on(engine.send_command(format_args!("AT+{}", long), "OK", TIMEOUT));
        assert_eq!(result, Err(TransactionError::CommandTooLong));
        assert_eq!(modem.written(), "");
    }

    #[test]
    fn test_publish_quoted() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<256> = ReceiveBuffer::new();
        let modem = SimModem::new(&rx, &clock);
        modem.expect("AT+QMTPUB=", &[(30, "\r\nOK\r\n\r\n+QMTPUB: 0,0,0\r\n")]);

        let mut engine = modem.engine(&LinkConfig::default());
        let result = block_on(engine.publish_quoted("$sys/P/D/cmd/response/42", "done", "OK"));
        assert_eq!(result, Ok(()));
        assert_eq!(
            modem.written(),
            "AT+QMTPUB=0,0,0,0,\"$sys/P/D/cmd/response/42\",\"done\"\r\n"
        );
    }

    #[test]
    fn test_publish_with_prompt() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<256> = ReceiveBuffer::new();
        let modem = SimModem::new(&rx, &clock);
        let payload = "{\"id\":\"1\",\"code\":200,\"msg\":\"success\"}";
        modem.expect("AT+QMTPUBEX=0,0,0,0,\"t\",37", &[(10, "\r\n> ")]);
        modem.expect(payload, &[(10, "\r\nOK\r\n"), (60, "\r\n+QMTPUBEX: 0,0,0\r\n")]);

        let mut engine = modem.engine(&LinkConfig::default());
        let result = block_on(engine.publish_with_prompt("t", payload, PROMPT_PUBLISH_CONFIRM));

        assert_eq!(result, Ok(()));
        assert_eq!(
            modem.written(),
            "AT+QMTPUBEX=0,0,0,0,\"t\",37\r\n{\"id\":\"1\",\"code\":200,\"msg\":\"success\"}"
        );
        assert_eq!(rx.available_len(), 0);
    }

    #[test]
    fn test_publish_with_prompt_no_prompt() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<256> = ReceiveBuffer::new();
        let modem = SimModem::new(&rx, &clock);
        modem.expect("AT+QMTPUBEX", &[(10, "\r\nERROR\r\n")]);

        let mut engine = modem.engine(&LinkConfig::default());
        let result = block_on(engine.publish_with_prompt("t", "{}", PROMPT_PUBLISH_CONFIRM));

        assert_eq!(
            result,
            Err(PublishError::Command(TransactionError::ModemError))
        );
        // payload never written
        assert_eq!(modem.written(), "AT+QMTPUBEX=0,0,0,0,\"t\",2\r\n");
    }

    #[test]
    fn test_publish_with_prompt_unconfirmed() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<256> = ReceiveBuffer::new();
        let modem = SimModem::new(&rx, &clock);
        modem.expect("AT+QMTPUBEX", &[(10, "\r\n> ")]);
        modem.expect("{}", &[]);

        let mut engine = modem.engine(&LinkConfig::default());
        let result = block_on(engine.publish_with_prompt("t", "{}", PROMPT_PUBLISH_CONFIRM));

        assert_eq!(result, Err(PublishError::Confirm(TransactionError::Timeout)));
    }

    #[test]
    fn test_drain() {
        let clock = SimClock::new();
        let rx: ReceiveBuffer<64> = ReceiveBuffer::new();
        for b in b"+QMTPUB: 0,0,0\r\n" {
            rx.on_byte_received(*b, 0);
        }
        let modem = SimModem::new(&rx, &clock);
        let engine = modem.engine(&LinkConfig::default());
        engine.drain();
        assert_eq!(rx.available_len(), 0);
    }
}
