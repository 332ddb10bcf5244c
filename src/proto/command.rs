use std::str::FromStr;

use thiserror::Error;

/// Upstream commands understood by the dashboard firmware. The connection
/// itself is protocol-agnostic; these only build the bytes to enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// `PWM:<0-255>`
    Pwm(u8),
    /// `READ`, ask for one sample now.
    Read,
    /// Any other text, sent verbatim.
    Raw(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("invalid PWM duty {0:?}, expected 0-255")]
    BadDuty(String),
}

impl DeviceCommand {
    /// Newline-terminated wire form.
    pub fn encode(&self) -> Vec<u8> {
        format_command(self).into_bytes()
    }

    /// The line as echoed in the session log, without the terminator.
    pub fn text(&self) -> String {
        match self {
            DeviceCommand::Pwm(v) => format!("PWM:{v}"),
            DeviceCommand::Read => "READ".into(),
            DeviceCommand::Raw(s) => s.clone(),
        }
    }
}

pub fn format_command(cmd: &DeviceCommand) -> String {
    let mut out = cmd.text();
    out.push('\n');
    out
}

/// Parse a line typed by the user.
///
/// `pwm <n>` / `PWM:<n>` and `read` are recognised (any case); anything else
/// is sent raw. Surrounding whitespace is trimmed.
pub fn parse_command(line: &str) -> Result<DeviceCommand, CommandError> {
    let s = line.trim();
    if s.is_empty() {
        return Err(CommandError::Empty);
    }
    if s.eq_ignore_ascii_case("read") {
        return Ok(DeviceCommand::Read);
    }

    let lower = s.to_ascii_lowercase();
    let duty = lower
        .strip_prefix("pwm:")
        .or_else(|| lower.strip_prefix("pwm "));
    if let Some(v) = duty {
        let v = v.trim();
        return v
            .parse::<u8>()
            .map(DeviceCommand::Pwm)
            .map_err(|_| CommandError::BadDuty(v.to_string()));
    }
    Ok(DeviceCommand::Raw(s.to_string()))
}

impl FromStr for DeviceCommand {
    type Err = CommandError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_command(s)
    }
}
