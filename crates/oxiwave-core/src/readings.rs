use std::time::{SystemTime, UNIX_EPOCH};

use oxiwave_decode::PulseOximeterValues;

#[derive(Debug, Clone, Copy)]
pub struct Reading {
    /// Milliseconds since the Unix epoch at decode time.
    pub timestamp_ms: u64,
    pub values: PulseOximeterValues,
}

impl Reading {
    /// Render one display line, e.g. `SpO2  98%  pulse  70 bpm  pleth  50`.
    pub fn to_line(&self, show_timestamp: bool) -> String {
        let mut line = String::new();
        if show_timestamp {
            let secs = self.timestamp_ms / 1000;
            let millis = self.timestamp_ms % 1000;
            let hours = (secs / 3600) % 24;
            let minutes = (secs / 60) % 60;
            let seconds = secs % 60;
            line.push_str(&format!(
                "[{hours:02}:{minutes:02}:{seconds:02}.{millis:03}] "
            ));
        }
        let v = &self.values;
        if !v.valid {
            line.push_str("-- sensor invalid --");
        } else {
            line.push_str(&format!(
                "SpO2 {:3}%  pulse {:3} bpm  pleth {:3}",
                v.spo2, v.pulse_rate, v.pleth
            ));
        }
        if !v.finger_present {
            line.push_str("  (no finger)");
        }
        line
    }
}

/// Bounded in-memory history of decoded measurements.
pub struct ReadingLog {
    entries: Vec<Reading>,
    max_entries: usize,
    show_invalid: bool,
}

impl ReadingLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries,
            show_invalid: true,
        }
    }

    /// Whether invalid readings appear in [`to_text`](Self::to_text) output.
    /// They are kept in the history either way.
    pub fn set_show_invalid(&mut self, show: bool) {
        self.show_invalid = show;
    }

    pub fn push(&mut self, values: PulseOximeterValues) {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;

        self.entries.push(Reading {
            timestamp_ms,
            values,
        });

        if self.entries.len() > self.max_entries {
            self.entries.remove(0);
        }
    }

    pub fn entries(&self) -> &[Reading] {
        &self.entries
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.entries.last()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn to_text(&self, show_timestamp: bool) -> String {
        let mut result = String::new();
        for entry in &self.entries {
            if !entry.values.valid && !self.show_invalid {
                continue;
            }
            result.push_str(&entry.to_line(show_timestamp));
            result.push('\n');
        }
        result
    }
}
