use std::io::{self, BufRead, Write};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, unbounded};
use tracing::{info, warn};

use serial_telemetry::logbook::LogBook;
use serial_telemetry::manager::{ConnectionManager, ManagerOptions};
use serial_telemetry::poll::Poller;
use serial_telemetry::port::SerialConnector;
use serial_telemetry::proto::command::{CommandError, DeviceCommand, parse_command};
use serial_telemetry::samples::{Sample, relative_times};
use serial_telemetry::{Disconnect, EventSubscriber};

use crate::cli::MonitorOpts;

pub fn run(opts: MonitorOpts) -> Result<()> {
    if opts.capacity == 0 {
        bail!("--capacity must be at least 1");
    }
    info!(?opts, "monitor");

    let mut mgr = ConnectionManager::with_options(
        SerialConnector,
        ManagerOptions {
            capacity: opts.capacity,
            ..ManagerOptions::default()
        },
    );
    mgr.open(opts.ser.connection())
        .with_context(|| format!("starting connection to {}", opts.ser.dev))?;

    let poller = opts
        .poll_interval()
        .map(|every| Poller::start(mgr.sender(), every))
        .transpose()
        .context("starting READ poller")?;

    let mut startup: Vec<DeviceCommand> = opts.pwm.map(DeviceCommand::Pwm).into_iter().collect();
    for line in &opts.send {
        match parse_command(line) {
            Ok(cmd) => startup.push(cmd),
            Err(CommandError::Empty) => {}
            Err(e) => bail!("--send {line:?}: {e}"),
        }
    }

    let input = spawn_stdin_reader();
    let mut console = Console::new(io::stdout(), opts.json);
    let tick = Duration::from_millis(opts.tick_ms.max(10));
    let deadline = opts.run_for().map(|d| Instant::now() + d);

    loop {
        mgr.dispatch(&mut console);

        if console.connected && !startup.is_empty() {
            for cmd in startup.drain(..) {
                console.send(&mgr, &cmd);
            }
        }
        for line in input.try_iter() {
            match parse_command(&line) {
                Ok(cmd) => console.send(&mgr, &cmd),
                Err(CommandError::Empty) => {}
                Err(e) => warn!("{e}"),
            }
        }

        if console.stopped || !mgr.is_running() {
            break;
        }
        if console.output_closed {
            info!("output closed");
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("duration elapsed");
            break;
        }
        thread::sleep(tick);
    }

    if let Some(p) = poller {
        let reads = p.stop();
        info!(reads, "polling stopped");
    }
    if !mgr.close() {
        warn!("serial port may still be held briefly");
    }
    mgr.dispatch(&mut console);

    console.summary(&mgr.samples().snapshot());
    if let Some(path) = &opts.save_log {
        console
            .log
            .save(path)
            .with_context(|| format!("saving log to {}", path.display()))?;
        info!(path = %path.display(), lines = console.log.len(), "log saved");
    }
    Ok(())
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    let spawned = thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "stdin input disabled");
    }
    rx
}

/// Foreground view of the link: prints lines or samples, keeps the session
/// log and the latest reading.
pub struct Console<W: Write> {
    out: W,
    json: bool,
    pub log: LogBook,
    pub connected: bool,
    pub stopped: bool,
    /// Set once stdout refuses writes (e.g. `| head` exited).
    pub output_closed: bool,
    pub latest: Option<Sample>,
}

impl<W: Write> Console<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self {
            out,
            json,
            log: LogBook::default(),
            connected: false,
            stopped: false,
            output_closed: false,
            latest: None,
        }
    }

    fn print(&mut self, text: &str) {
        if self.output_closed {
            return;
        }
        if let Err(e) = writeln!(self.out, "{text}") {
            if e.kind() != io::ErrorKind::BrokenPipe {
                warn!(error = %e, "writing output");
            }
            self.output_closed = true;
        }
    }

    fn send(&mut self, mgr: &ConnectionManager, cmd: &DeviceCommand) {
        // A refusal comes back as a NotConnected event on the next drain.
        if mgr.enqueue_send(cmd.encode()) {
            self.log.sent(&cmd.text());
        }
    }

    fn summary(&mut self, samples: &[Sample]) {
        let span = relative_times(samples).last().copied().unwrap_or(0.0);
        eprintln!(
            "[monitor] samples={} span={:.1}s log_lines={}",
            samples.len(),
            span,
            self.log.len()
        );
        if let Some(s) = self.latest {
            eprintln!("[monitor] Temp {:.2} °C", s.temperature);
            eprintln!("[monitor] Humidity {:.2} %", s.humidity);
        }
    }
}

impl<W: Write> EventSubscriber for Console<W> {
    fn on_line(&mut self, text: &str) {
        self.log.append(text);
        if !self.json {
            self.print(text);
        }
    }

    fn on_sample(&mut self, sample: &Sample) {
        self.latest = Some(*sample);
        if self.json {
            match serde_json::to_string(sample) {
                Ok(s) => self.print(&s),
                Err(e) => warn!(error = %e, "encoding sample"),
            }
        }
    }

    fn on_connected(&mut self, port: &str) {
        self.connected = true;
        info!(port, "● Connected");
    }

    fn on_disconnected(&mut self, reason: &Disconnect) {
        self.connected = false;
        warn!(kind = ?reason.kind, "● Disconnected: {}", reason.reason);
    }

    fn on_not_connected(&mut self) {
        self.log.not_connected();
        warn!("not connected, command dropped");
    }

    fn on_stopped(&mut self) {
        self.connected = false;
        self.stopped = true;
    }
}
