//! Headless operator console.
//!
//! Renders every [`StateChange`] through `tracing` and reads operator intents
//! from stdin, one per line:
//!
//! ```text
//! toggle <spot>     flip a parking spot (0..4)
//! warn on|off       switch the warning light
//! send <text>       show text on the display board
//! clear             clear the message log
//! connect           connect, or retry right away
//! disconnect        close the broker connection
//! state             print the full dashboard
//! quit              leave
//! ```

use std::fmt::Write as _;
use std::str::FromStr;

use color_eyre::{eyre::eyre, Result};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeHandle, ChangeCause, DashboardSnapshot, StateChange};
use crate::mqtt::{Command, ConnectionState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Dashboard(Command),
    ClearLog,
    Connect,
    Disconnect,
    ShowState,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Empty input")]
    Empty,

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("'{0}' is not a spot number")]
    InvalidSpot(String),

    #[error("Expected 'on' or 'off', got '{0}'")]
    InvalidSwitch(String),

    #[error("Usage: {0}")]
    MissingArgument(&'static str),
}

impl FromStr for ConsoleCommand {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word.to_ascii_lowercase().as_str() {
            "" => Err(ParseError::Empty),
            "toggle" => {
                if rest.is_empty() {
                    return Err(ParseError::MissingArgument("toggle <spot>"));
                }
                let spot = rest
                    .parse::<usize>()
                    .map_err(|_| ParseError::InvalidSpot(rest.to_string()))?;
                Ok(Self::Dashboard(Command::ToggleSpot(spot)))
            }
            "warn" => match rest.to_ascii_lowercase().as_str() {
                "on" => Ok(Self::Dashboard(Command::SetWarning(true))),
                "off" => Ok(Self::Dashboard(Command::SetWarning(false))),
                "" => Err(ParseError::MissingArgument("warn on|off")),
                other => Err(ParseError::InvalidSwitch(other.to_string())),
            },
            // empty text is left to command validation
            "send" => Ok(Self::Dashboard(Command::SetDisplayMessage(rest.to_string()))),
            "clear" => Ok(Self::ClearLog),
            "connect" => Ok(Self::Connect),
            "disconnect" => Ok(Self::Disconnect),
            "state" => Ok(Self::ShowState),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(ParseError::UnknownCommand(other.to_string())),
        }
    }
}

/// `[X][ ][ ][X][ ]`, occupied spots marked.
pub fn render_spots(snapshot: &DashboardSnapshot) -> String {
    snapshot
        .spots
        .iter()
        .map(|spot| if spot.occupied { "[X]" } else { "[ ]" })
        .collect()
}

pub fn render_summary(snapshot: &DashboardSnapshot) -> String {
    let mut line = format!(
        "{} | {} free | warning {} | board '{}'",
        render_spots(snapshot),
        snapshot.available_spots,
        if snapshot.warning_light.on { "ON" } else { "off" },
        snapshot.display_message.text
    );
    let _ = write!(line, " | broker {}", snapshot.connection_status);
    if let Some(error) = &snapshot.connection_error {
        let _ = write!(line, " ({})", error);
    }
    if let Some(status) = &snapshot.device_status {
        let _ = write!(line, " | device {}", status);
    }
    line
}

pub fn render_state(snapshot: &DashboardSnapshot) -> String {
    let mut out = render_summary(snapshot);
    for record in snapshot.logs.iter() {
        let _ = write!(
            out,
            "\n  #{:<4} {} {}",
            record.sequence,
            record.timestamp.format("%H:%M:%S"),
            record.text
        );
    }
    out
}

fn log_change(change: &StateChange) {
    let snapshot = &change.snapshot;
    match &change.cause {
        ChangeCause::Telemetry { .. } | ChangeCause::DecodeFailure(_) => {
            if let Some(record) = snapshot.logs.last() {
                info!("#{} {}", record.sequence, record.text);
            }
            info!("{}", render_summary(snapshot));
        }
        ChangeCause::Command(kind) => info!("Sent {}: {}", kind, render_summary(snapshot)),
        ChangeCause::LogCleared => info!("Message log cleared"),
        ChangeCause::Connection(ConnectionState::Error) => warn!(
            "Broker error: {}",
            snapshot.connection_error.as_deref().unwrap_or("unknown")
        ),
        ChangeCause::Connection(state) => info!("Broker {}", state),
    }
}

async fn render_changes(bridge: BridgeHandle, shutdown: CancellationToken) {
    let mut changes = bridge.subscribe_to_changes();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            change = changes.recv() => match change {
                Ok(change) => log_change(&change),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Skipped {} dashboard updates", skipped);
                    info!("{}", render_summary(&bridge.get_state()));
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Returns `false` once the operator asked to quit.
async fn execute(bridge: &BridgeHandle, command: ConsoleCommand) -> Result<bool> {
    match command {
        ConsoleCommand::Dashboard(command) => match bridge.issue_command(command).await {
            Ok(handle) => {
                tokio::spawn(async move {
                    if let Err(e) = handle.delivered().await {
                        warn!("Command not confirmed by the broker: {}", e);
                    }
                });
            }
            Err(e) => warn!("{}", e),
        },
        ConsoleCommand::ClearLog => bridge.clear_log().await?,
        ConsoleCommand::Connect => bridge.connect().await?,
        ConsoleCommand::Disconnect => bridge.disconnect().await?,
        ConsoleCommand::ShowState => info!("{}", render_state(&bridge.get_state())),
        ConsoleCommand::Quit => return Ok(false),
    }
    Ok(true)
}

/// Runs until stdin closes, `quit` is entered or `shutdown` fires.
pub async fn run(bridge: BridgeHandle, shutdown: CancellationToken) -> Result<()> {
    let renderer = tokio::spawn(render_changes(bridge.clone(), shutdown.clone()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    info!("Console ready, type 'state' for the dashboard or 'quit' to leave");

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line.map_err(|e| eyre!("Failed to read stdin: {}", e))?,
        };

        let Some(line) = line else {
            debug!("stdin closed");
            break;
        };

        match line.parse::<ConsoleCommand>() {
            Ok(command) => match execute(&bridge, command).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => error!("{}", e),
            },
            Err(ParseError::Empty) => {}
            Err(e) => warn!("{}", e),
        }
    }

    shutdown.cancel();
    if let Err(e) = renderer.await {
        error!("Console renderer failed: {}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::{LogRecord, ParkingState};
    use chrono::Local;
    use std::sync::Arc;

    fn parse(line: &str) -> Result<ConsoleCommand, ParseError> {
        line.parse()
    }

    #[test]
    fn parses_dashboard_commands() {
        assert_eq!(
            parse("toggle 3"),
            Ok(ConsoleCommand::Dashboard(Command::ToggleSpot(3)))
        );
        assert_eq!(
            parse("  WARN on "),
            Ok(ConsoleCommand::Dashboard(Command::SetWarning(true)))
        );
        assert_eq!(
            parse("warn off"),
            Ok(ConsoleCommand::Dashboard(Command::SetWarning(false)))
        );
        assert_eq!(
            parse("send Lot  full today"),
            Ok(ConsoleCommand::Dashboard(Command::SetDisplayMessage(
                "Lot  full today".into()
            )))
        );
        assert_eq!(
            parse("send"),
            Ok(ConsoleCommand::Dashboard(Command::SetDisplayMessage(String::new())))
        );
    }

    #[test]
    fn parses_control_commands() {
        assert_eq!(parse("clear"), Ok(ConsoleCommand::ClearLog));
        assert_eq!(parse("connect"), Ok(ConsoleCommand::Connect));
        assert_eq!(parse("disconnect"), Ok(ConsoleCommand::Disconnect));
        assert_eq!(parse("state"), Ok(ConsoleCommand::ShowState));
        assert_eq!(parse("exit"), Ok(ConsoleCommand::Quit));
    }

    #[test]
    fn reports_bad_input() {
        assert_eq!(parse("   "), Err(ParseError::Empty));
        assert_eq!(parse("toggle"), Err(ParseError::MissingArgument("toggle <spot>")));
        assert_eq!(parse("toggle two"), Err(ParseError::InvalidSpot("two".into())));
        assert_eq!(parse("warn maybe"), Err(ParseError::InvalidSwitch("maybe".into())));
        assert_eq!(parse("park"), Err(ParseError::UnknownCommand("park".into())));
    }

    #[test]
    fn renders_snapshot() {
        let mut parking = ParkingState::new();
        parking.set_all_spots([true, false, false, true, false]);
        parking.set_warning(true);
        parking.set_display_message("Lot full");
        let parking = parking.snapshot();

        let snapshot = DashboardSnapshot {
            revision: 7,
            connection_status: ConnectionState::Error,
            connection_error: Some("timed out".into()),
            device_status: Some("online".into()),
            spots: parking.spots,
            available_spots: parking.available_spots(),
            warning_light: parking.warning_light,
            display_message: parking.display_message,
            logs: vec![Arc::new(LogRecord {
                sequence: 12,
                timestamp: Local::now(),
                text: "[lot/admin] {}".into(),
            })]
            .into(),
        };

        assert_eq!(render_spots(&snapshot), "[X][ ][ ][X][ ]");
        assert_eq!(
            render_summary(&snapshot),
            "[X][ ][ ][X][ ] | 3 free | warning ON | board 'Lot full' | broker error (timed out) | device online"
        );
        let full = render_state(&snapshot);
        assert_eq!(full.lines().count(), 2);
        assert!(full.lines().nth(1).unwrap().contains("#12"));
    }
}
