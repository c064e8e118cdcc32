//! 🧾 RunSummary: the receipt at the end of the meal.
//!
//! Produced once per run by the supervisor, which is the only one allowed to write
//! to it. Immutable once handed back. Rendered as a comfy table for humans.

use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};

/// 📊 What happened, in numbers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Non-blank lines read from the input.
    pub documents_read: u64,
    /// Broken lines dropped under skip-broken.
    pub documents_skipped: u64,
    /// Documents in batches the cluster accepted at the transport level.
    pub documents_indexed: u64,
    /// Per-item rejections reported inside 2xx bulk responses.
    pub item_errors: u64,
    pub batches_submitted: u64,
    pub batches_failed: u64,
    /// Extra attempts spent beyond the first, across all batches.
    pub retries: u64,
    pub elapsed: Duration,
    /// Best-effort post-run lifecycle failures. Logged, listed, never fatal.
    pub post_run_errors: Vec<String>,
    pub success: bool,
}

impl RunSummary {
    pub fn docs_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.documents_indexed as f64 / secs
        } else {
            0.0
        }
    }

    /// 🍽️ The comfy table. Lumbar support included.
    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["metric", "value"]);

        let verdict = if self.success { "✅ success" } else { "💀 failed" };
        let rows: Vec<(&str, String)> = vec![
            ("verdict", verdict.to_string()),
            ("documents read", self.documents_read.to_string()),
            ("documents skipped", self.documents_skipped.to_string()),
            ("documents indexed", self.documents_indexed.to_string()),
            ("item errors", self.item_errors.to_string()),
            ("batches submitted", self.batches_submitted.to_string()),
            ("batches failed", self.batches_failed.to_string()),
            ("retries", self.retries.to_string()),
            ("elapsed", format!("{:.3}s", self.elapsed.as_secs_f64())),
            ("docs/s", format!("{:.1}", self.docs_per_sec())),
        ];
        for (metric, value) in rows {
            table.add_row(vec![
                Cell::new(metric),
                Cell::new(value).set_alignment(CellAlignment::Right),
            ]);
        }
        for problem in &self.post_run_errors {
            table.add_row(vec![Cell::new("⚠️ post-run"), Cell::new(problem)]);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_table_tells_the_whole_story() {
        let summary = RunSummary {
            documents_read: 3,
            documents_indexed: 3,
            batches_submitted: 2,
            elapsed: Duration::from_secs(2),
            post_run_errors: vec!["refresh failed".to_string()],
            success: true,
            ..RunSummary::default()
        };
        assert!((summary.docs_per_sec() - 1.5).abs() < f64::EPSILON);

        let rendered = summary.to_table().to_string();
        assert!(rendered.contains("documents indexed"));
        assert!(rendered.contains("refresh failed"));
        assert!(rendered.contains("success"));
    }

    #[test]
    fn the_one_where_zero_elapsed_does_not_divide_by_zero() {
        assert_eq!(RunSummary::default().docs_per_sec(), 0.0);
    }
}
