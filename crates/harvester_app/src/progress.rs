//! Human-readable progress lines on stdout, one per candidate outcome.
use std::sync::Mutex;

use harvester_engine::{CandidateOutcome, HarvestEvent, ProgressSink, TransferProgress};

/// Prints candidate outcomes; transfer progress only when `show_transfers` is set.
pub struct ConsoleProgress {
    show_transfers: bool,
    /// Last reported tenth of the current transfer.
    last_decile: Mutex<Option<u64>>,
}

impl ConsoleProgress {
    pub fn new(show_transfers: bool) -> Self {
        Self {
            show_transfers,
            last_decile: Mutex::new(None),
        }
    }

    fn transfer(&self, progress: &TransferProgress) {
        let Some(fraction) = progress.fraction() else {
            return;
        };
        let decile = (fraction * 10.0).floor() as u64;
        let mut last = match self.last_decile.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *last == Some(decile) {
            return;
        }
        *last = Some(decile);
        println!(
            "  {:>3}% ({}/{} bytes)",
            decile * 10,
            progress.bytes_so_far,
            progress.total.unwrap_or_default()
        );
    }
}

impl ProgressSink for ConsoleProgress {
    fn emit(&self, event: HarvestEvent) {
        match event {
            HarvestEvent::Transfer(progress) => {
                if self.show_transfers {
                    self.transfer(&progress);
                }
            }
            HarvestEvent::CandidateFinished { location, outcome } => {
                if let Some(line) = outcome_line(&location, &outcome) {
                    println!("{line}");
                }
            }
            HarvestEvent::LocationFailed { location, reason } => {
                println!("[unreadable] {location}: {reason}");
            }
        }
    }
}

/// `None` for candidates the file-type filter excluded.
pub fn outcome_line(location: &str, outcome: &CandidateOutcome) -> Option<String> {
    match outcome {
        CandidateOutcome::Ineligible => None,
        CandidateOutcome::Persisted(path) => Some(format!("[saved] {}", path.display())),
        CandidateOutcome::SkippedExisting(path) => {
            Some(format!("[exists] {}", path.display()))
        }
        CandidateOutcome::Failed { stage, reason } => {
            Some(format!("[failed while {stage}] {location}: {reason}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvester_core::Stage;
    use std::path::PathBuf;

    #[test]
    fn outcome_lines() {
        assert_eq!(outcome_line("u", &CandidateOutcome::Ineligible), None);
        assert_eq!(
            outcome_line("u", &CandidateOutcome::Persisted(PathBuf::from("out/a.json"))),
            Some("[saved] out/a.json".to_string())
        );
        assert_eq!(
            outcome_line(
                "https://x/a.png",
                &CandidateOutcome::Failed {
                    stage: Stage::Extracting,
                    reason: "no workflow metadata found in image".into()
                }
            ),
            Some(
                "[failed while extracting] https://x/a.png: no workflow metadata found in image"
                    .to_string()
            )
        );
    }
}
