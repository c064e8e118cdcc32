//! 📊 progress.rs: "Are we there yet?" Every bulk load, every time, forever.
//!
//! A spinner with a running count and rate. Hidden unless `verbose` asked for it.
//! ⚠️ Watching it will not make it go faster. We've tried. Science says no.

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

/// 🔢 "1000000" → "1,000,000": you're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// 📈 Live progress for one run. Only the supervisor touches it.
pub(crate) struct ProgressMetrics {
    bar: ProgressBar,
    started: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("ProgressMetrics")
            .field("started", &self.started)
            .finish()
    }
}

impl ProgressMetrics {
    pub(crate) fn new(enabled: bool) -> Self {
        let bar = if enabled {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
                bar.set_style(style);
            }
            bar.enable_steady_tick(Duration::from_millis(200));
            bar
        } else {
            ProgressBar::hidden()
        };
        Self {
            bar,
            started: Instant::now(),
        }
    }

    /// 🔄 Redraw with fresh totals.
    pub(crate) fn update(&self, indexed: u64, skipped: u64) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            indexed as f64 / elapsed
        } else {
            0.0
        };
        self.bar.set_message(format!(
            "📦 {} docs indexed | 🗑️ {} skipped | 🚀 {:.0} docs/s",
            format_number(indexed),
            format_number(skipped),
            rate
        ));
    }

    /// ✅ Ring the bell. We made it. (Or we didn't. Same bell.)
    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_big_numbers_get_their_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn the_one_where_a_hidden_bar_takes_updates_without_complaint() {
        let progress = ProgressMetrics::new(false);
        progress.update(10, 1);
        progress.finish();
    }
}
