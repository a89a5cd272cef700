//! Interrupt-fed modem receive buffer
//!
//! The UART receive interrupt appends bytes; the main loop snapshots and
//! clears. Both sides go through a `critical_section::Mutex`, so the
//! read-then-clear sequence on the consumer side can never lose a byte the
//! ISR appended in between.
//!
//! # Frame segmentation
//!
//! The modem does not terminate every reply with a usable delimiter, so a
//! frame is declared complete once the line has been quiet for longer than
//! the idle threshold:
//!
//! ```text
//! available_len() > 0 && now - last_byte_time > idle_threshold_ms
//! ```
//!
//! This is best effort. Two notifications closer together than the
//! threshold merge into one frame, and a modem that stalls mid-reply for
//! longer than the threshold splits one reply into two frames. Both are
//! known limitations of the heuristic.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Vec;

/// Default receive capacity in bytes
pub const DEFAULT_RX_CAPACITY: usize = 4096;

struct RxState<const N: usize> {
    bytes: Vec<u8, N>,
    last_byte_ms: u64,
    /// Bytes dropped since the last clear
    dropped: u32,
    /// Bytes dropped since boot
    dropped_total: u32,
}

/// Fixed-capacity byte buffer shared between the UART ISR and the main loop
///
/// Intended to live in a `static`:
///
/// ```
/// use agrilink_core::rx::ReceiveBuffer;
/// static MODEM_RX: ReceiveBuffer<4096> = ReceiveBuffer::new();
/// ```
pub struct ReceiveBuffer<const N: usize = DEFAULT_RX_CAPACITY> {
    state: Mutex<RefCell<RxState<N>>>,
}

impl<const N: usize> ReceiveBuffer<N> {
    /// Create an empty buffer
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(RxState {
                bytes: Vec::new(),
                last_byte_ms: 0,
                dropped: 0,
                dropped_total: 0,
            })),
        }
    }

    /// Append one received byte (interrupt context)
    ///
    /// Returns `false` when the buffer is full and the byte was dropped.
    /// The arrival time is recorded either way, since the line is still busy.
    pub fn on_byte_received(&self, byte: u8, now_ms: u64) -> bool {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.last_byte_ms = now_ms;
            if state.bytes.push(byte).is_ok() {
                true
            } else {
                state.dropped = state.dropped.saturating_add(1);
                state.dropped_total = state.dropped_total.saturating_add(1);
                false
            }
        })
    }

    /// Number of bytes currently buffered
    pub fn available_len(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).bytes.len())
    }

    /// Bytes dropped because the buffer was full, since boot
    pub fn overflow_count(&self) -> u32 {
        critical_section::with(|cs| self.state.borrow_ref(cs).dropped_total)
    }

    /// Whether the buffered bytes form a complete frame
    pub fn is_frame_complete(&self, now_ms: u64, idle_threshold_ms: u32) -> bool {
        critical_section::with(|cs| {
            let state = self.state.borrow_ref(cs);
            !state.bytes.is_empty()
                && now_ms.saturating_sub(state.last_byte_ms) > u64::from(idle_threshold_ms)
        })
    }

    /// Copy the buffered bytes without consuming them
    pub fn snapshot(&self) -> Frame<N> {
        critical_section::with(|cs| {
            let state = self.state.borrow_ref(cs);
            Frame {
                bytes: state.bytes.clone(),
                dropped: state.dropped,
            }
        })
    }

    /// Copy the buffered bytes and clear, atomically with respect to the ISR
    pub fn take_frame(&self) -> Frame<N> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let frame = Frame {
                bytes: state.bytes.clone(),
                dropped: state.dropped,
            };
            state.bytes.clear();
            state.dropped = 0;
            frame
        })
    }

    /// Discard everything buffered so far
    pub fn clear(&self) {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.bytes.clear();
            state.dropped = 0;
        });
    }
}

impl<const N: usize> Default for ReceiveBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// An owned copy of the receive buffer contents
#[derive(Clone)]
pub struct Frame<const N: usize> {
    bytes: Vec<u8, N>,
    dropped: u32,
}

impl<const N: usize> Frame<N> {
    /// Raw bytes, bounded at the received length
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes lost to overflow while this frame was being received
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// The frame as text
    ///
    /// Modem replies are ASCII. If line noise produced invalid UTF-8, the
    /// text is cut at the first invalid byte.
    pub fn as_text(&self) -> &str {
        match core::str::from_utf8(&self.bytes) {
            Ok(text) => text,
            Err(e) => core::str::from_utf8(&self.bytes[..e.valid_up_to()]).unwrap_or(""),
        }
    }
}
