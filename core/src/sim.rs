//! Simulated modem, clock and peripherals for host tests
//!
//! `SimModem` plays the modem side of the UART: each flushed write is
//! matched against the next scripted exchange, and the scripted replies are
//! delivered into the shared [`ReceiveBuffer`] as the simulated clock
//! advances past their arrival times, the way the UART ISR would.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::string::String;
use std::vec::Vec;

use agrilink_hal::{Actuators, Clock, SensorSample, Sensors};
use embedded_hal_async::delay::DelayNs;

use crate::at::AtEngine;
use crate::cloud::topics::SUBSCRIPTIONS;
use crate::config::LinkConfig;
use crate::rx::ReceiveBuffer;

pub struct SimClock {
    now: Cell<u64>,
}

impl SimClock {
    pub fn new() -> Self {
        Self { now: Cell::new(0) }
    }

    pub fn now(&self) -> u64 {
        self.now.get()
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

struct Exchange {
    prefix: String,
    replies: Vec<(u64, String)>,
}

pub struct SimModem<'a, const N: usize> {
    rx: &'a ReceiveBuffer<N>,
    clock: &'a SimClock,
    script: RefCell<VecDeque<Exchange>>,
    scheduled: RefCell<Vec<(u64, String)>>,
    pending: RefCell<Vec<u8>>,
    written: RefCell<Vec<u8>>,
    sent: RefCell<Vec<String>>,
}

impl<'a, const N: usize> SimModem<'a, N> {
    pub fn new(rx: &'a ReceiveBuffer<N>, clock: &'a SimClock) -> Self {
        Self {
            rx,
            clock,
            script: RefCell::new(VecDeque::new()),
            scheduled: RefCell::new(Vec::new()),
            pending: RefCell::new(Vec::new()),
            written: RefCell::new(Vec::new()),
            sent: RefCell::new(Vec::new()),
        }
    }

    /// Script the next exchange: a flushed write starting with `prefix`
    /// gets `replies`, each `(delay_ms, text)` after the flush
    pub fn expect(&self, prefix: &str, replies: &[(u64, &str)]) {
        self.script.borrow_mut().push_back(Exchange {
            prefix: prefix.into(),
            replies: replies.iter().map(|(d, t)| (*d, String::from(*t))).collect(),
        });
    }

    /// Script the usual happy-path prompt publish
    pub fn expect_prompt_publish(&self) {
        self.expect("AT+QMTPUBEX=", &[(5, "\r\n> ")]);
        self.expect("", &[(5, "\r\nOK\r\n"), (20, "\r\n+QMTPUBEX: 0,0,0\r\n")]);
    }

    /// Script a successful bring-up as `P`/`D` with password `secret`,
    /// attaching on the `attach_after`th `AT+CGATT?` poll
    pub fn script_bring_up(&self, attach_after: usize) {
        self.expect("AT\r\n", &[(5, "\r\nOK\r\n")]);
        self.expect("ATE0", &[(5, "ATE0\r\r\nOK\r\n")]);
        self.expect("AT+CIMI", &[(5, "\r\n460001234567890\r\n\r\nOK\r\n")]);
        self.expect("AT+CGATT=1", &[(50, "\r\nOK\r\n")]);
        for _ in 1..attach_after {
            self.expect("AT+CGATT?", &[(5, "\r\n+CGATT: 0\r\n\r\nOK\r\n")]);
        }
        self.expect("AT+CGATT?", &[(5, "\r\n+CGATT: 1\r\n\r\nOK\r\n")]);
        self.expect("AT+QMTCFG=\"version\",0,4", &[(5, "\r\nOK\r\n")]);
        self.expect(
            "AT+QMTOPEN=0,\"mqtts.heclouds.com\",1883",
            &[(5, "\r\nOK\r\n"), (300, "\r\n+QMTOPEN: 0,0\r\n")],
        );
        self.expect(
            "AT+QMTCONN=0,\"D\",\"P\",\"secret\"",
            &[(5, "\r\nOK\r\n"), (200, "\r\n+QMTCONN: 0,0,0\r\n")],
        );
        for i in 1..=SUBSCRIPTIONS.len() {
            let reply = std::format!("\r\nOK\r\n\r\n+QMTSUB: 0,{},0,1\r\n", i);
            self.expect("AT+QMTSUB=0,", &[(20, reply.as_str())]);
        }
    }

    /// Deliver unsolicited text `after_ms` from now
    pub fn inject(&self, after_ms: u64, text: &str) {
        let at = self.clock.now() + after_ms;
        self.scheduled.borrow_mut().push((at, text.into()));
    }

    /// Everything written so far, concatenated
    pub fn written(&self) -> String {
        String::from_utf8(self.written.borrow().clone()).unwrap()
    }

    /// Each flushed write, in order
    pub fn sent(&self) -> Vec<String> {
        self.sent.borrow().clone()
    }

    /// Exchanges scripted but never triggered
    pub fn unused_exchanges(&self) -> usize {
        self.script.borrow().len()
    }

    pub fn engine(&self, config: &LinkConfig) -> AtEngine<'_, SimTx<'_, N>, &SimClock, SimDelay<'_, N>, N> {
        AtEngine::new(
            self.rx,
            SimTx { modem: self },
            self.clock,
            SimDelay { modem: self },
            config,
        )
    }

    /// Advance the clock, delivering scheduled bytes on the way
    pub fn advance(&self, ms: u64) {
        let target = self.clock.now() + ms;
        loop {
            let next = {
                let mut scheduled = self.scheduled.borrow_mut();
                scheduled.sort_by_key(|(at, _)| *at);
                match scheduled.first() {
                    Some((at, _)) if *at <= target => Some(scheduled.remove(0)),
                    _ => None,
                }
            };
            let Some((at, text)) = next else { break };
            if at > self.clock.now() {
                self.clock.set(at);
            }
            for b in text.bytes() {
                self.rx.on_byte_received(b, self.clock.now());
            }
        }
        self.clock.set(target);
    }

    fn on_flush(&self) {
        let chunk = String::from_utf8(core::mem::take(&mut *self.pending.borrow_mut())).unwrap();
        self.sent.borrow_mut().push(chunk.clone());
        let Some(exchange) = self.script.borrow_mut().pop_front() else {
            return;
        };
        assert!(
            chunk.starts_with(&exchange.prefix),
            "modem expected '{}' but got '{}'",
            exchange.prefix,
            chunk
        );
        let now = self.clock.now();
        let mut scheduled = self.scheduled.borrow_mut();
        for (delay, text) in exchange.replies {
            scheduled.push((now + delay, text));
        }
    }
}

pub struct SimTx<'s, const N: usize> {
    modem: &'s SimModem<'s, N>,
}

impl<const N: usize> embedded_io_async::ErrorType for SimTx<'_, N> {
    type Error = core::convert::Infallible;
}

impl<const N: usize> embedded_io_async::Write for SimTx<'_, N> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.modem.pending.borrow_mut().extend_from_slice(buf);
        self.modem.written.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.modem.on_flush();
        Ok(())
    }
}

pub struct SimDelay<'s, const N: usize> {
    modem: &'s SimModem<'s, N>,
}

impl<const N: usize> DelayNs for SimDelay<'_, N> {
    async fn delay_ns(&mut self, ns: u32) {
        self.modem.advance(u64::from(ns).div_ceil(1_000_000));
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.modem.advance(u64::from(ms));
    }
}

/// Records every actuator call
#[derive(Default)]
pub struct SimActuators {
    pub fan_power: Vec<u8>,
    pub interventions: Vec<i32>,
    pub indicator: Vec<bool>,
}

impl Actuators for SimActuators {
    fn set_fan_power(&mut self, percent: u8) {
        self.fan_power.push(percent);
    }

    fn apply_intervention(&mut self, mode: i32) {
        self.interventions.push(mode);
    }

    fn set_indicator(&mut self, on: bool) {
        self.indicator.push(on);
    }
}

/// Returns queued samples, then repeats the last one
pub struct SimSensors {
    samples: VecDeque<SensorSample>,
    last: Option<SensorSample>,
}

impl SimSensors {
    pub fn new(samples: &[SensorSample]) -> Self {
        Self {
            samples: samples.iter().copied().collect(),
            last: None,
        }
    }
}

impl Sensors for SimSensors {
    fn sample(&mut self) -> Option<SensorSample> {
        if let Some(sample) = self.samples.pop_front() {
            self.last = Some(sample);
        }
        self.last
    }
}
