use std::time::{Duration, Instant};

use crate::convert::Outcome;

/// Counters for one directory run. Owned and mutated by the run loop
/// alone, rendered once at the end, then discarded.
#[derive(Debug)]
pub struct RunStats {
    pub total: u64,
    pub converted: u64,
    pub suppressed: u64,
    pub error_io: u64,
    pub error_access: u64,
    started: Instant,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            total: 0,
            converted: 0,
            suppressed: 0,
            error_io: 0,
            error_access: 0,
            started: Instant::now(),
        }
    }

    pub fn record(&mut self, outcome: &Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Skipped => {}
            Outcome::Suppressed => self.suppressed += 1,
            Outcome::Converted { .. } => self.converted += 1,
            Outcome::IoError(_) => self.error_io += 1,
            Outcome::AccessError(_) => self.error_access += 1,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn nothing_changed(&self) -> bool {
        self.converted == 0 && self.error_io == 0 && self.error_access == 0
    }

    /// Summary lines, ready for console and log alike. Percentage and
    /// timing lines are suppressed when nothing changed; percentages are
    /// only rendered against a non-zero total.
    pub fn summary(&self, test_only: bool) -> Vec<String> {
        let mut lines = vec![format!("Total files {}.", self.total)];
        if self.nothing_changed() {
            lines.push("No files changed.".to_string());
            return lines;
        }

        lines.push(format!("Time {:.2}s.", self.elapsed().as_secs_f64()));
        let converted_label = if test_only {
            "Files to convert"
        } else {
            "Converted files"
        };
        push_counter(&mut lines, converted_label, self.converted, self.total);
        push_counter(&mut lines, "Suppressed files", self.suppressed, self.total);
        push_counter(&mut lines, "Files with IO errors", self.error_io, self.total);
        push_counter(
            &mut lines,
            "Files with access errors",
            self.error_access,
            self.total,
        );
        lines
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

fn push_counter(lines: &mut Vec<String>, label: &str, count: u64, total: u64) {
    if count == 0 || total == 0 {
        return;
    }
    lines.push(format!(
        "{label} {count} ({:.2}%)",
        count as f64 * 100.0 / total as f64
    ));
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn skipped_files_only_count_toward_total() {
        let mut stats = RunStats::new();
        stats.record(&Outcome::Skipped);
        stats.record(&Outcome::Skipped);
        assert_eq!(stats.total, 2);
        assert!(stats.nothing_changed());

        let lines = stats.summary(false);
        assert_eq!(lines, ["Total files 2.", "No files changed."]);
    }

    #[test]
    fn summary_reports_counts_with_percentages() {
        let mut stats = RunStats::new();
        stats.record(&Outcome::Converted {
            lines: 10,
            dry_run: false,
        });
        stats.record(&Outcome::Skipped);
        stats.record(&Outcome::IoError(io::Error::other("boom")));
        stats.record(&Outcome::AccessError(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "denied",
        )));

        let lines = stats.summary(false);
        assert_eq!(lines[0], "Total files 4.");
        assert!(lines[1].starts_with("Time "));
        assert!(lines.contains(&"Converted files 1 (25.00%)".to_string()));
        assert!(lines.contains(&"Files with IO errors 1 (25.00%)".to_string()));
        assert!(lines.contains(&"Files with access errors 1 (25.00%)".to_string()));
        assert!(!lines.iter().any(|line| line.starts_with("Suppressed")));
    }

    #[test]
    fn test_only_changes_the_converted_label() {
        let mut stats = RunStats::new();
        stats.record(&Outcome::Converted {
            lines: 0,
            dry_run: true,
        });
        let lines = stats.summary(true);
        assert!(lines.contains(&"Files to convert 1 (100.00%)".to_string()));
    }

    #[test]
    fn suppressed_only_runs_report_no_changes() {
        let mut stats = RunStats::new();
        stats.record(&Outcome::Suppressed);
        assert!(stats.nothing_changed());
        assert!(stats.summary(false).contains(&"No files changed.".to_string()));
    }

    #[test]
    fn empty_run_has_no_percentage_lines() {
        let stats = RunStats::new();
        let lines = stats.summary(false);
        assert_eq!(lines, ["Total files 0.", "No files changed."]);
    }
}
