use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

use serial_telemetry::decode::decode;
use serial_telemetry::frame::line_text;
use serial_telemetry::port::available_ports;
use serial_telemetry::samples::now_secs;

use crate::cli::DecodeOpts;

pub fn ports() -> Result<()> {
    let ports = available_ports().context("enumerating serial ports")?;
    if ports.is_empty() {
        eprintln!("no serial ports found");
    }
    for p in ports {
        println!("{}\t{}", p.name, p.description);
    }
    Ok(())
}

pub fn decode_stdin(opts: DecodeOpts) -> Result<()> {
    let n = decode_lines(io::stdin().lock(), io::stdout().lock(), opts.json)?;
    eprintln!("[decode] {n} samples");
    Ok(())
}

/// Decode every line of `input`, writing one output line per sample.
/// Returns the number of samples.
pub fn decode_lines(mut input: impl BufRead, mut out: impl Write, json: bool) -> Result<usize> {
    let mut raw = Vec::new();
    let mut count = 0;
    loop {
        raw.clear();
        if input.read_until(b'\n', &mut raw).context("reading input")? == 0 {
            break;
        }
        let text = line_text(&raw);
        let Some(reading) = decode(&text) else {
            continue;
        };
        let sample = reading.at(now_secs());
        if json {
            serde_json::to_writer(&mut out, &sample)?;
            writeln!(out)?;
        } else {
            writeln!(
                out,
                "temp={:.2} hum={:.2}",
                sample.temperature, sample.humidity
            )?;
        }
        count += 1;
    }
    out.flush()?;
    Ok(count)
}
