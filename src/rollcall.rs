//! Finish roll-call for the shared results board
//!
//! Keeps finishers in the order they crossed the line and renders the text
//! block broadcast to race UI.

use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consts::ROLL_CALL_CAP;
use crate::sim::ParticipantId;

/// Label used for racers still on course when the match ends
pub const DID_NOT_FINISH: &str = "Did Not Finish";
/// Label used for finishers past the ordinal cap
pub const FINISHED: &str = "Finished";

/// A single finish entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishEntry {
    pub id: ParticipantId,
    pub name: String,
    /// Elapsed match time at the finish line
    pub elapsed: Duration,
}

/// Ordered finish list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollCall {
    entries: Vec<FinishEntry>,
    /// Number of finishers that get an ordinal label
    cap: usize,
}

impl Default for RollCall {
    fn default() -> Self {
        Self::new(ROLL_CALL_CAP)
    }
}

impl RollCall {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            cap,
        }
    }

    /// Record a finisher, returning their 1-indexed finishing place.
    /// Finishers past the cap are still recorded.
    pub fn record(&mut self, id: ParticipantId, name: impl Into<String>, elapsed: Duration) -> usize {
        self.entries.push(FinishEntry {
            id,
            name: name.into(),
            elapsed,
        });
        self.entries.len()
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Finishing place of a racer (1-indexed)
    pub fn place_of(&self, id: ParticipantId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id).map(|i| i + 1)
    }

    pub fn entries(&self) -> &[FinishEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Render the finishers, one line each
    pub fn render(&self) -> String {
        let mut text = String::new();
        for (i, entry) in self.entries.iter().enumerate() {
            if i < self.cap {
                let _ = writeln!(
                    text,
                    "{}: {} [{}]",
                    ordinal(i + 1),
                    entry.name,
                    format_race_time(entry.elapsed)
                );
            } else {
                let _ = writeln!(
                    text,
                    "{}\t{} [{}]",
                    FINISHED,
                    entry.name,
                    format_race_time(entry.elapsed)
                );
            }
        }
        text
    }

    /// Render the finishers followed by the racers who never made it
    pub fn render_final<'a, I>(&self, non_finishers: I) -> String
    where
        I: IntoIterator<Item = (&'a str, Duration)>,
    {
        let mut text = self.render();
        for (name, elapsed) in non_finishers {
            let _ = writeln!(text, "{}\t{} [{}]", DID_NOT_FINISH, name, format_race_time(elapsed));
        }
        text
    }
}

/// English ordinal for a 1-indexed place ("1st", "2nd", "11th", "23rd")
pub fn ordinal(place: usize) -> String {
    let suffix = match (place % 10, place % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{place}{suffix}")
}

/// Format an elapsed time as `MM:SS:CC` (hundredths, rounded)
pub fn format_race_time(elapsed: Duration) -> String {
    let centis = (elapsed.as_secs_f64() * 100.0).round() as u64;
    let minutes = centis / 6000;
    let seconds = (centis / 100) % 60;
    let hundredths = centis % 100;
    format!("{minutes:02}:{seconds:02}:{hundredths:02}")
}
