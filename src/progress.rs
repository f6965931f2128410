//! Terminal feedback for one-off searches.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

/// (threshold, rate unit, count suffix), largest first.
const SCALES: [(f64, &str, &str); 3] = [
    (1e9, "GH/s", "B"),
    (1e6, "MH/s", "M"),
    (1e3, "KH/s", "K"),
];

/// Bar that fills toward the search cutoff, with hash rate in the message.
pub struct SearchProgress {
    bar: ProgressBar,
    started: Instant,
    expected: u64,
}

impl SearchProgress {
    pub fn new(prefix: &str, expected: u64, cutoff: Duration) -> Self {
        let bar = ProgressBar::new(cutoff.as_secs().max(1));
        let style = ProgressStyle::with_template(
            "{spinner:.green} '{prefix}' [{elapsed_precise}] {bar:30.cyan/blue} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_prefix(prefix.to_string());
        Self {
            bar,
            started: Instant::now(),
            expected,
        }
    }

    pub fn tick(&self, attempts: u64) {
        let elapsed = self.started.elapsed();
        let rate = per_second(attempts, elapsed);
        // Expected work left at the current rate; meaningless until hashing starts.
        let eta = (rate > 0.0).then(|| {
            let left = self.expected.saturating_sub(attempts) as f64 / rate;
            format_duration(Duration::from_secs_f64(left))
        });

        self.bar.set_position(elapsed.as_secs());
        self.bar.set_message(format!(
            "{} | {} tried | ~{} to go",
            format_hashrate(rate),
            format_number(attempts),
            eta.as_deref().unwrap_or("?")
        ));
    }

    pub fn found(&self, attempts: u64) {
        let elapsed = self.started.elapsed();
        self.bar.finish_with_message(format!(
            "matched after {} tries in {} ({})",
            format_number(attempts),
            format_duration(elapsed),
            format_hashrate(per_second(attempts, elapsed))
        ));
    }

    pub fn abandon(&self, msg: &str) {
        self.bar.abandon_with_message(msg.to_string());
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    match elapsed.as_secs_f64() {
        secs if secs > 0.0 => count as f64 / secs,
        _ => 0.0,
    }
}

pub fn format_hashrate(rate: f64) -> String {
    match SCALES.iter().find(|(at, _, _)| rate >= *at) {
        Some((at, unit, _)) => format!("{:.2} {unit}", rate / at),
        None => format!("{rate:.0} H/s"),
    }
}

pub fn format_number(n: u64) -> String {
    match SCALES.iter().find(|(at, _, _)| n as f64 >= *at) {
        Some((at, _, suffix)) => format!("{:.2}{suffix}", n as f64 / at),
        None => n.to_string(),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m {s}s"),
        _ => format!("{h}h {m}m"),
    }
}
