//! Connection manager: one background control loop per serial link.
//!
//! The loop owns the port handle outright. The foreground talks to it only
//! through hand-offs:
//!
//! - the [`Outbox`] (foreground pushes payloads, loop writes them),
//! - the [`SampleRing`] (loop pushes decoded samples, foreground snapshots),
//! - a bounded event channel (loop posts, foreground drains on its tick),
//! - a stop channel whose sender is dropped by [`ConnectionManager::close`],
//!   and a done channel whose sender the loop drops when it returns.
//!
//! Port failures never surface as errors to the owner. They show up as
//! `Disconnected` events and, depending on `auto_reconnect`, either a backoff
//! and retry or a terminal `Stopped`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded};
use tracing::{debug, info, trace, warn};

use crate::config::{ConnectionConfig, DEFAULT_CAPACITY, DEFAULT_EVENT_CAPACITY, Timing};
use crate::decode::decode;
use crate::error::{FailureKind, LinkError, ManagerError};
use crate::events::{Disconnect, EventSubscriber, LinkEvent, dispatch};
use crate::frame::{LineFramer, MAX_LINE, line_text};
use crate::link::{Connector, Link};
use crate::outbox::Outbox;
use crate::samples::{SampleRing, now_secs};
use crate::state::{ConnectionState, Trigger};

const READ_CHUNK: usize = 1024;

/// Construction-time knobs that are not part of `ConnectionConfig`.
#[derive(Debug, Clone, Copy)]
pub struct ManagerOptions {
    pub timing: Timing,
    /// Sample ring capacity.
    pub capacity: usize,
    /// Events held before the loop starts dropping them.
    pub event_capacity: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            timing: Timing::default(),
            capacity: DEFAULT_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

struct Shared {
    outbox: Outbox,
    samples: SampleRing,
    state: Mutex<ConnectionState>,
    ever_connected: AtomicBool,
    running: AtomicBool,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Cloneable handle for queueing outbound payloads from any thread.
#[derive(Clone)]
pub struct CommandSender {
    shared: Arc<Shared>,
    events: Sender<LinkEvent>,
}

impl CommandSender {
    /// Queue `payload` for transmission. Never blocks.
    ///
    /// Refused (returns `false` and posts `NotConnected`) until the link has
    /// come up once, and again after the loop has stopped. While the link is
    /// merely down and retrying, payloads are kept and flushed on reconnect.
    pub fn enqueue_send(&self, payload: impl Into<Vec<u8>>) -> bool {
        let live = self.shared.running.load(Ordering::Acquire)
            && self.shared.ever_connected.load(Ordering::Acquire);
        if !live {
            debug!("send refused: not connected");
            let _ = self.events.try_send(LinkEvent::NotConnected);
            return false;
        }
        self.shared.outbox.push(payload.into());
        true
    }

    pub fn pending(&self) -> usize {
        self.shared.outbox.len()
    }
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
    options: ManagerOptions,
    events_tx: Sender<LinkEvent>,
    events_rx: Receiver<LinkEvent>,
    connector: Option<Box<dyn Connector>>,
    stop_tx: Option<Sender<()>>,
    done_rx: Option<Receiver<()>>,
    worker: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self::with_options(connector, ManagerOptions::default())
    }

    /// A zero `capacity` or `event_capacity` is raised to 1.
    pub fn with_options(connector: impl Connector + 'static, options: ManagerOptions) -> Self {
        let options = ManagerOptions {
            capacity: options.capacity.max(1),
            event_capacity: options.event_capacity.max(1),
            ..options
        };
        let (events_tx, events_rx) = bounded(options.event_capacity);
        Self {
            shared: Arc::new(Shared {
                outbox: Outbox::new(),
                samples: SampleRing::new(options.capacity),
                state: Mutex::new(ConnectionState::Idle),
                ever_connected: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            options,
            events_tx,
            events_rx,
            connector: Some(Box::new(connector)),
            stop_tx: None,
            done_rx: None,
            worker: None,
        }
    }

    /// Start the control loop for `config`. Only fails if the manager was
    /// already opened or the worker thread could not be spawned.
    pub fn open(&mut self, config: ConnectionConfig) -> Result<(), ManagerError> {
        let connector = self.connector.take().ok_or(ManagerError::AlreadyOpen)?;
        let state = self
            .shared
            .state()
            .next(Trigger::OpenRequested, config.auto_reconnect);
        self.shared.publish(state);
        self.shared.running.store(true, Ordering::Release);

        let (stop_tx, stop_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(0);
        let worker = ControlLoop {
            config,
            timing: self.options.timing,
            connector,
            link: None,
            framer: LineFramer::new(MAX_LINE),
            shared: Arc::clone(&self.shared),
            events: self.events_tx.clone(),
            stop: stop_rx,
            _done: done_tx,
            state,
            read_buf: vec![0; READ_CHUNK],
            dropped_events: 0,
        };

        match thread::Builder::new()
            .name("serial-link".into())
            .spawn(move || worker.run())
        {
            Ok(handle) => {
                self.worker = Some(handle);
                self.stop_tx = Some(stop_tx);
                self.done_rx = Some(done_rx);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.publish(ConnectionState::Stopped);
                Err(ManagerError::Spawn(e))
            }
        }
    }

    /// Ask the loop to stop and wait up to `Timing::close_wait` for it to
    /// release the port. Returns `false` if it was still running when the
    /// wait ran out; it will finish on its own shortly after.
    pub fn close(&mut self) -> bool {
        self.stop_tx.take();
        let Some(handle) = self.worker.take() else {
            if self.shared.state() == ConnectionState::Idle {
                self.shared.publish(ConnectionState::Stopped);
            }
            return true;
        };

        let finished = match self.done_rx.take() {
            Some(done) => matches!(
                done.recv_timeout(self.options.timing.close_wait),
                Err(RecvTimeoutError::Disconnected)
            ),
            None => true,
        };
        if !finished {
            warn!(
                wait = ?self.options.timing.close_wait,
                "control loop still running after close wait"
            );
            return false;
        }
        if handle.join().is_err() {
            warn!("control loop panicked");
        }
        true
    }

    pub fn enqueue_send(&self, payload: impl Into<Vec<u8>>) -> bool {
        self.sender().enqueue_send(payload)
    }

    pub fn sender(&self) -> CommandSender {
        CommandSender {
            shared: Arc::clone(&self.shared),
            events: self.events_tx.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// `true` from `open()` until the control loop has returned.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn samples(&self) -> SampleRing {
        self.shared.samples.clone()
    }

    pub fn events(&self) -> Receiver<LinkEvent> {
        self.events_rx.clone()
    }

    /// Deliver all queued events to `sub` on the calling thread.
    pub fn dispatch(&self, sub: &mut dyn EventSubscriber) -> usize {
        dispatch(&self.events_rx, sub)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

enum Activity {
    /// At least one complete line was handled.
    Busy,
    Idle,
}

struct ControlLoop {
    config: ConnectionConfig,
    timing: Timing,
    connector: Box<dyn Connector>,
    link: Option<Box<dyn Link>>,
    framer: LineFramer,
    shared: Arc<Shared>,
    events: Sender<LinkEvent>,
    stop: Receiver<()>,
    /// Dropped with the loop; `close` waits on the other end.
    _done: Sender<()>,
    state: ConnectionState,
    read_buf: Vec<u8>,
    dropped_events: u64,
}

impl ControlLoop {
    fn run(mut self) {
        info!(
            port = %self.config.port_identifier,
            baud = self.config.baud_rate,
            auto_reconnect = self.config.auto_reconnect,
            "control loop started"
        );

        if let Err(p) = panic::catch_unwind(AssertUnwindSafe(|| self.run_loop())) {
            warn!(panic = %panic_message(&*p), "control loop aborted");
        }
        self.shutdown();
    }

    fn run_loop(&mut self) {
        loop {
            if self.stop_requested() {
                break;
            }

            if self.link.is_none() {
                if matches!(self.state, ConnectionState::Faulted { .. }) {
                    self.advance(Trigger::BackoffElapsed);
                }
                let opened = panic::catch_unwind(AssertUnwindSafe(|| {
                    self.connector.open(&self.config, &self.timing)
                }))
                .unwrap_or_else(|p| Err(LinkError::Unexpected(panic_message(&*p))));
                match opened {
                    Ok(link) => {
                        self.attach(link);
                        if self.pause(self.timing.warm_up) {
                            break;
                        }
                    }
                    Err(e) => {
                        let backoff = self.timing.open_backoff;
                        self.report(&e);
                        self.advance(Trigger::OpenFailed {
                            backoff_until: Instant::now() + backoff,
                        });
                        if self.state.is_terminal() || self.pause(backoff) {
                            break;
                        }
                        continue;
                    }
                }
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.service()))
                .unwrap_or_else(|p| Err(LinkError::Unexpected(panic_message(&*p))));

            let stop = match outcome {
                Ok(Activity::Busy) => false,
                Ok(Activity::Idle) => self.pause(self.timing.idle_yield),
                Err(e) if e.kind() == FailureKind::Unexpected => {
                    self.report(&e);
                    self.advance(Trigger::Unexpected);
                    self.pause(self.timing.unexpected_backoff)
                }
                Err(e) => {
                    let backoff = self.timing.io_backoff;
                    self.report(&e);
                    self.detach();
                    self.advance(Trigger::IoFailed {
                        backoff_until: Instant::now() + backoff,
                    });
                    self.state.is_terminal() || self.pause(backoff)
                }
            };
            if stop {
                break;
            }
        }
    }

    /// Drain the outbox, then do one bounded read.
    fn service(&mut self) -> Result<Activity, LinkError> {
        let Some(link) = self.link.as_mut() else {
            return Ok(Activity::Idle);
        };

        while let Some(payload) = self.shared.outbox.pop() {
            link.write_all(&payload)?;
            trace!(bytes = payload.len(), "tx");
        }

        let n = link.read_chunk(&mut self.read_buf)?;
        if n == 0 {
            return Ok(Activity::Idle);
        }

        let dropped = self.framer.dropped();
        let lines = self.framer.push(&self.read_buf[..n]);
        if self.framer.dropped() > dropped {
            warn!(max = MAX_LINE, "discarded overlong line");
        }

        let mut handled = false;
        for raw in lines {
            let text = line_text(&raw);
            if !text.is_empty() {
                self.handle_line(text);
                handled = true;
            }
        }
        Ok(if handled {
            Activity::Busy
        } else {
            Activity::Idle
        })
    }

    fn handle_line(&mut self, text: String) {
        debug!(line = %text, "rx");
        let reading = decode(&text);
        self.emit(LinkEvent::Line(text));
        if let Some(reading) = reading {
            let sample = reading.at(now_secs());
            self.shared.samples.push(sample);
            self.emit(LinkEvent::Sample(sample));
        }
    }

    fn attach(&mut self, link: Box<dyn Link>) {
        self.link = Some(link);
        self.framer.reset();
        self.advance(Trigger::OpenSucceeded);
        self.shared.ever_connected.store(true, Ordering::Release);
        info!(port = %self.config.port_identifier, "connected");
        self.emit(LinkEvent::Connected {
            port: self.config.port_identifier.clone(),
        });
    }

    fn detach(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.close() {
                warn!(error = %e, "closing port");
            }
            debug!("port released");
        }
        self.framer.reset();
    }

    fn shutdown(&mut self) {
        self.advance(Trigger::StopRequested);
        if panic::catch_unwind(AssertUnwindSafe(|| self.detach())).is_err() {
            warn!("port close panicked");
        }
        self.advance(Trigger::HandleReleased);
        self.shared.running.store(false, Ordering::Release);
        info!(port = %self.config.port_identifier, "control loop stopped");
        self.emit(LinkEvent::Stopped);
    }

    fn report(&mut self, e: &LinkError) {
        warn!(port = %self.config.port_identifier, error = %e, "disconnected");
        self.emit(LinkEvent::Disconnected(Disconnect {
            kind: e.kind(),
            reason: e.to_string(),
        }));
    }

    fn advance(&mut self, trigger: Trigger) {
        let next = self.state.next(trigger, self.config.auto_reconnect);
        if next != self.state {
            trace!(from = self.state.label(), to = next.label(), ?trigger, "state");
        }
        self.state = next;
        self.shared.publish(next);
    }

    fn emit(&mut self, ev: LinkEvent) {
        if let Err(TrySendError::Full(_)) = self.events.try_send(ev) {
            self.dropped_events += 1;
            if self.dropped_events.is_power_of_two() {
                warn!(
                    dropped = self.dropped_events,
                    "event queue full, foreground is not draining"
                );
            }
        }
    }

    fn stop_requested(&self) -> bool {
        matches!(
            self.stop.try_recv(),
            Ok(()) | Err(TryRecvError::Disconnected)
        )
    }

    /// Sleep for `d` unless a stop arrives first. Returns `true` on stop.
    fn pause(&self, d: Duration) -> bool {
        !matches!(self.stop.recv_timeout(d), Err(RecvTimeoutError::Timeout))
    }
}

fn panic_message(p: &(dyn Any + Send)) -> String {
    p.downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| p.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic in control loop".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn never_opens(cfg: &ConnectionConfig, _: &Timing) -> Result<Box<dyn Link>, LinkError> {
        Err(LinkError::open(&cfg.port_identifier, "No such file or directory"))
    }

    fn fast() -> ManagerOptions {
        ManagerOptions {
            timing: Timing::fast(),
            ..ManagerOptions::default()
        }
    }

    #[test]
    fn send_before_open_is_refused() {
        let mgr = ConnectionManager::with_options(never_opens, fast());
        assert!(!mgr.enqueue_send(b"READ\n".to_vec()));
        assert_eq!(mgr.sender().pending(), 0);
        assert_eq!(mgr.events().try_recv(), Ok(LinkEvent::NotConnected));
    }

    #[test]
    fn close_without_open() {
        let mut mgr = ConnectionManager::with_options(never_opens, fast());
        assert_eq!(mgr.state(), ConnectionState::Idle);
        assert!(mgr.close());
        assert_eq!(mgr.state(), ConnectionState::Stopped);
        assert!(!mgr.is_running());
    }

    #[test]
    fn open_twice_is_rejected() {
        let mut mgr = ConnectionManager::with_options(never_opens, fast());
        mgr.open(ConnectionConfig::new("ttyX", 9600)).unwrap();
        assert!(matches!(
            mgr.open(ConnectionConfig::new("ttyX", 9600)),
            Err(ManagerError::AlreadyOpen)
        ));
        assert!(mgr.close());
    }

    fn slow_open(cfg: &ConnectionConfig, _: &Timing) -> Result<Box<dyn Link>, LinkError> {
        thread::sleep(Duration::from_millis(300));
        Err(LinkError::open(&cfg.port_identifier, "Device or resource busy"))
    }

    fn panicking_open(_: &ConnectionConfig, _: &Timing) -> Result<Box<dyn Link>, LinkError> {
        panic!("driver refused to enumerate")
    }

    fn wait_stopped(mgr: &ConnectionManager) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while mgr.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        !mgr.is_running()
    }

    #[test]
    fn zero_capacities_are_raised() {
        let mgr = ConnectionManager::with_options(
            never_opens,
            ManagerOptions {
                capacity: 0,
                event_capacity: 0,
                ..fast()
            },
        );
        assert_eq!(mgr.samples().capacity(), 1);
        assert!(!mgr.enqueue_send(b"x".to_vec()));
        assert_eq!(mgr.events().try_recv(), Ok(LinkEvent::NotConnected));
    }

    #[test]
    fn close_gives_up_after_close_wait() {
        let mut opts = fast();
        opts.timing.close_wait = Duration::from_millis(50);
        let mut mgr = ConnectionManager::with_options(slow_open, opts);
        mgr.open(ConnectionConfig::new("ttyX", 9600)).unwrap();
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        assert!(!mgr.close());
        assert!(started.elapsed() < Duration::from_millis(250));
        // The detached loop still winds down once the open returns.
        assert!(wait_stopped(&mgr));
        assert_eq!(mgr.state(), ConnectionState::Stopped);
    }

    #[test]
    fn panicking_open_is_reported_and_stops_without_reconnect() {
        let mut mgr = ConnectionManager::with_options(panicking_open, fast());
        let rx = mgr.events();
        mgr.open(ConnectionConfig::new("ttyX", 9600).auto_reconnect(false))
            .unwrap();
        assert!(wait_stopped(&mgr));

        let events: Vec<LinkEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                LinkEvent::Disconnected(Disconnect {
                    kind: FailureKind::Unexpected,
                    reason: "unexpected: driver refused to enumerate".into(),
                }),
                LinkEvent::Stopped,
            ]
        );
        assert_eq!(mgr.state(), ConnectionState::Stopped);
        assert!(mgr.close());
    }

    #[test]
    fn panic_messages() {
        let p: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*p), "boom");
        let p: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*p), "bang");
        let p: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*p), "panic in control loop");
    }
}
