//! Deadline-based reply matcher
//!
//! One `Wait` tracks one expected reply. The engine feeds it the current
//! receive text and time on every poll; the state only ever moves out of
//! `Pending` once.

/// Marker the modem uses for every failed command
pub const ERROR_MARKER: &str = "ERROR";

/// State of an outstanding wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitState {
    /// Still waiting; gives up at `deadline_ms`
    Pending { deadline_ms: u64 },
    /// Expected text seen
    Done,
    /// `ERROR` seen before the expected text
    Failed,
    /// Deadline passed with neither
    TimedOut,
}

/// Waits for `expect` (or `ERROR`) to appear in the receive text
#[derive(Debug, Clone, Copy)]
pub struct Wait<'e> {
    expect: &'e str,
    state: WaitState,
}

impl<'e> Wait<'e> {
    pub fn new(expect: &'e str, now_ms: u64, timeout_ms: u32) -> Self {
        Self {
            expect,
            state: WaitState::Pending {
                deadline_ms: now_ms.saturating_add(u64::from(timeout_ms)),
            },
        }
    }

    pub fn state(&self) -> WaitState {
        self.state
    }

    /// Advance with the latest receive text
    ///
    /// The text is checked before the deadline, so a reply that lands on
    /// the last poll still counts.
    pub fn poll(&mut self, text: &str, now_ms: u64) -> WaitState {
        if let WaitState::Pending { deadline_ms } = self.state {
            if !text.is_empty() && text.contains(self.expect) {
                self.state = WaitState::Done;
            } else if text.contains(ERROR_MARKER) {
                self.state = WaitState::Failed;
            } else if now_ms >= deadline_ms {
                self.state = WaitState::TimedOut;
            }
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_before_deadline() {
        let mut wait = Wait::new("OK", 0, 100);
        assert_eq!(wait.poll("", 10), WaitState::Pending { deadline_ms: 100 });
        assert_eq!(wait.poll("AT\r\r\n", 20), WaitState::Pending { deadline_ms: 100 });
        assert_eq!(wait.poll("AT\r\r\nOK\r\n", 30), WaitState::Done);
    }

    #[test]
    fn test_error_marker() {
        let mut wait = Wait::new("+QMTOPEN: 0,0", 0, 100);
        assert_eq!(wait.poll("\r\n+CME ERROR: 3\r\n", 5), WaitState::Failed);
    }

    #[test]
    fn test_expect_wins_over_error() {
        let mut wait = Wait::new("OK", 0, 100);
        assert_eq!(wait.poll("ERROR\r\nOK\r\n", 5), WaitState::Done);
    }

    #[test]
    fn test_deadline() {
        let mut wait = Wait::new("OK", 1_000, 50);
        assert_eq!(wait.poll("", 1_049), WaitState::Pending { deadline_ms: 1_050 });
        assert_eq!(wait.poll("", 1_050), WaitState::TimedOut);
    }

    #[test]
    fn test_late_reply_on_deadline_poll_counts() {
        let mut wait = Wait::new("OK", 0, 50);
        assert_eq!(wait.poll("OK", 50), WaitState::Done);
    }

    #[test]
    fn test_terminal_state_sticks() {
        let mut wait = Wait::new("OK", 0, 10);
        assert_eq!(wait.poll("", 20), WaitState::TimedOut);
        assert_eq!(wait.poll("OK", 21), WaitState::TimedOut);
    }
}
