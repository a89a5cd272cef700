//! USART1 plumbing between the modem and `agrilink-core`
//!
//! Receive is interrupt driven: the USART1 handler moves each byte into the
//! shared [`ReceiveBuffer`]. Transmit is blocking; AT commands are short and
//! the modem is the only thing on the line.

use agrilink_core::ReceiveBuffer;
use agrilink_hal::Clock;
use embassy_stm32::mode::Blocking;
use embassy_stm32::pac;
use embassy_stm32::usart::UartTx;
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{ErrorKind, ErrorType, Write};
use rtic_monotonics::stm32::prelude::*;

use crate::Mono;

/// Modem receive buffer capacity in bytes
pub const RX_CAPACITY: usize = 4096;

/// Bytes from the modem, filled by the USART1 interrupt
pub static MODEM_RX: ReceiveBuffer<RX_CAPACITY> = ReceiveBuffer::new();

/// Transmit failure on the modem UART
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum ModemTxError {
    /// The peripheral reported an error during a blocking write
    Uart,
}

impl core::fmt::Display for ModemTxError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Uart => write!(f, "Modem UART write failed"),
        }
    }
}

impl core::error::Error for ModemTxError {}

impl embedded_io_async::Error for ModemTxError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Transmit half of the modem UART
pub struct ModemTx {
    uart: UartTx<'static, Blocking>,
}

impl ModemTx {
    pub fn new(uart: UartTx<'static, Blocking>) -> Self {
        Self { uart }
    }
}

impl ErrorType for ModemTx {
    type Error = ModemTxError;
}

impl Write for ModemTx {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.uart
            .blocking_write(buf)
            .map_err(|_| ModemTxError::Uart)?;
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.uart.blocking_flush().map_err(|_| ModemTxError::Uart)
    }
}

/// Enable the USART1 receiver and its RXNE interrupt
///
/// `UartTx` only turns on the transmitter; the receive side is serviced
/// straight from the registers so the interrupt can feed [`MODEM_RX`].
pub fn enable_receive() {
    pac::USART1.cr1().modify(|w| {
        w.set_re(true);
        w.set_rxneie(true);
    });
}

/// Body of the USART1 interrupt
///
/// Reading SR then DR clears RXNE and any overrun flag.
pub fn on_usart1_interrupt() {
    let sr = pac::USART1.sr().read();
    if sr.rxne() || sr.ore() {
        let byte = pac::USART1.dr().read().dr() as u8;
        let now_ms = MonoClock.now_ms();
        if !MODEM_RX.on_byte_received(byte, now_ms) && MODEM_RX.overflow_count() == 1 {
            // later drops are reported by the main loop with the running count
            defmt::warn!("Modem RX buffer full, dropping bytes");
        }
    }
}

/// Milliseconds from the TIM2 monotonic
#[derive(Debug, Clone, Copy, Default)]
pub struct MonoClock;

impl Clock for MonoClock {
    fn now_ms(&self) -> u64 {
        Mono::now().duration_since_epoch().to_millis()
    }
}

/// Async delay on the TIM2 monotonic
#[derive(Debug, Clone, Copy, Default)]
pub struct MonoDelay;

impl DelayNs for MonoDelay {
    async fn delay_ns(&mut self, ns: u32) {
        Mono::delay(u64::from(ns.div_ceil(1_000)).micros()).await;
    }

    async fn delay_ms(&mut self, ms: u32) {
        Mono::delay(u64::from(ms).millis()).await;
    }
}
