//! Line-oriented sensor input for `pulselink-device monitor`.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

use pulselink_core::{Coordinates, FixValidity, LocationFix};

use crate::sensors::{HeartRateFeed, LocationFeed};

/// One parsed input line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorLine {
    HeartRate(u16),
    Location(LocationFix),
}

impl SensorLine {
    /// Parses `hr <bpm>` or `loc <lat> <lng> [A|V]` (status defaults to `A`).
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        match parts.next()? {
            "hr" => {
                let bpm = parts.next()?.parse().ok()?;
                parts.next().is_none().then_some(Self::HeartRate(bpm))
            }
            "loc" => {
                let latitude = parts.next()?.parse().ok()?;
                let longitude = parts.next()?.parse().ok()?;
                let validity = parts.next().map_or(FixValidity::Valid, FixValidity::from_status);
                parts.next().is_none().then_some(Self::Location(LocationFix::new(
                    Coordinates::new(latitude, longitude),
                    validity,
                )))
            }
            _ => None,
        }
    }
}

/// Feeds parsed lines into the sensor feeds until EOF.
///
/// Returns the number of lines accepted.
pub async fn pump_lines<R>(input: R, heart_rate: &HeartRateFeed, location: &LocationFeed) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut accepted = 0;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read sensor input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match SensorLine::parse(&line) {
            Some(SensorLine::HeartRate(bpm)) => {
                heart_rate.record(bpm);
                accepted += 1;
            }
            Some(SensorLine::Location(fix)) => {
                location.record(fix);
                accepted += 1;
            }
            None => warn!(line = %line, "Ignoring unrecognized sensor line"),
        }
    }
    accepted
}
