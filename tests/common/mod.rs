//! Scripted stand-in for a serial port.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use serial_telemetry::{ConnectionConfig, Connector, Link, LinkError, LinkEvent, Timing};

/// What one `read_chunk` call does.
#[derive(Debug, Clone)]
pub enum Step {
    Bytes(Vec<u8>),
    Fail(io::ErrorKind),
    Unexpected(&'static str),
    Panic,
}

pub fn bytes(s: &str) -> Step {
    Step::Bytes(s.as_bytes().to_vec())
}

/// Outcome of one open attempt.
#[derive(Debug, Clone)]
pub enum Attempt {
    Refuse(&'static str),
    /// The driver panics inside `open`.
    Panic(&'static str),
    Accept { steps: Vec<Step>, fail_writes: bool },
}

impl Attempt {
    pub fn link(steps: Vec<Step>) -> Self {
        Attempt::Accept {
            steps,
            fail_writes: false,
        }
    }

    pub fn failing_writes(steps: Vec<Step>) -> Self {
        Attempt::Accept {
            steps,
            fail_writes: true,
        }
    }
}

/// Counters shared between the fake and the test body.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    pub attempts: Arc<AtomicUsize>,
    pub opened: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
    pub written: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Probe {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }
}

pub struct FakeConnector {
    plan: VecDeque<Attempt>,
    probe: Probe,
}

impl FakeConnector {
    /// Once `plan` runs out every further open is refused.
    pub fn new(plan: Vec<Attempt>) -> (Self, Probe) {
        let probe = Probe::default();
        (
            Self {
                plan: plan.into(),
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl Connector for FakeConnector {
    fn open(
        &mut self,
        config: &ConnectionConfig,
        _timing: &Timing,
    ) -> Result<Box<dyn Link>, LinkError> {
        self.probe.attempts.fetch_add(1, Ordering::SeqCst);
        match self.plan.pop_front() {
            Some(Attempt::Accept { steps, fail_writes }) => {
                self.probe.opened.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(FakeLink {
                    steps: steps.into(),
                    fail_writes,
                    released: false,
                    probe: self.probe.clone(),
                }))
            }
            Some(Attempt::Refuse(why)) => Err(LinkError::open(&config.port_identifier, why)),
            Some(Attempt::Panic(msg)) => panic!("{msg}"),
            None => Err(LinkError::open(&config.port_identifier, "no such device")),
        }
    }
}

struct FakeLink {
    steps: VecDeque<Step>,
    fail_writes: bool,
    released: bool,
    probe: Probe,
}

impl FakeLink {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.probe.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Link for FakeLink {
    fn write_all(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed").into());
        }
        self.probe.written.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        match self.steps.pop_front() {
            Some(Step::Bytes(b)) => {
                let n = b.len().min(buf.len());
                buf[..n].copy_from_slice(&b[..n]);
                if n < b.len() {
                    self.steps.push_front(Step::Bytes(b[n..].to_vec()));
                }
                Ok(n)
            }
            Some(Step::Fail(kind)) => Err(io::Error::new(kind, "device unplugged").into()),
            Some(Step::Unexpected(why)) => Err(LinkError::Unexpected(why.into())),
            Some(Step::Panic) => panic!("driver bug"),
            None => {
                // Behave like a read timing out on a quiet line.
                thread::sleep(Duration::from_millis(2));
                Ok(0)
            }
        }
    }

    fn close(&mut self) -> Result<(), LinkError> {
        self.release();
        Ok(())
    }
}

impl Drop for FakeLink {
    fn drop(&mut self) {
        self.release();
    }
}

pub fn fast_timing() -> Timing {
    Timing::fast()
}

/// Poll `cond` until it holds or `within` passes.
pub fn wait_until(within: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Accumulates events from the manager's channel for later assertions.
#[derive(Default)]
pub struct EventLog {
    pub events: Vec<LinkEvent>,
}

impl EventLog {
    pub fn pull(&mut self, rx: &Receiver<LinkEvent>) {
        self.events.extend(rx.try_iter());
    }

    pub fn wait_for(
        &mut self,
        rx: &Receiver<LinkEvent>,
        within: Duration,
        mut cond: impl FnMut(&[LinkEvent]) -> bool,
    ) -> bool {
        wait_until(within, || {
            self.pull(rx);
            cond(&self.events)
        })
    }

    pub fn count(&self, pred: impl Fn(&LinkEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn disconnects(&self) -> usize {
        self.count(|e| matches!(e, LinkEvent::Disconnected(_)))
    }

    pub fn connects(&self) -> usize {
        self.count(|e| matches!(e, LinkEvent::Connected { .. }))
    }

    pub fn lines(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                LinkEvent::Line(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }
}
