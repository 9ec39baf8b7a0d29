use std::fmt;

/// Pipeline stage a candidate failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Discovering,
    Downloading,
    Extracting,
    Writing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Discovering => "discovering",
            Stage::Downloading => "downloading",
            Stage::Extracting => "extracting",
            Stage::Writing => "writing",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    /// Candidate URI, or the listing/page location for discovery failures.
    pub location: String,
    pub stage: Stage,
    pub reason: String,
}

/// Run-level tally. Owned and mutated only by the orchestrator driving the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub total_candidates_seen: u64,
    pub total_eligible: u64,
    pub total_persisted: u64,
    pub total_skipped_existing: u64,
    pub total_failed: u64,
    /// Per-candidate and per-subtree failures, in the order they were observed.
    pub errors: Vec<RunError>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ineligible(&mut self) {
        self.total_candidates_seen += 1;
    }

    pub fn record_persisted(&mut self) {
        self.total_candidates_seen += 1;
        self.total_eligible += 1;
        self.total_persisted += 1;
    }

    pub fn record_skipped(&mut self) {
        self.total_candidates_seen += 1;
        self.total_eligible += 1;
        self.total_skipped_existing += 1;
    }

    pub fn record_failure(
        &mut self,
        location: impl Into<String>,
        stage: Stage,
        reason: impl Into<String>,
    ) {
        self.total_candidates_seen += 1;
        self.total_eligible += 1;
        self.total_failed += 1;
        self.errors.push(RunError {
            location: location.into(),
            stage,
            reason: reason.into(),
        });
    }

    /// A sub-directory or sub-page that could not be enumerated. Not a candidate,
    /// so only the error list grows.
    pub fn record_subtree_failure(&mut self, location: impl Into<String>, reason: impl Into<String>) {
        self.errors.push(RunError {
            location: location.into(),
            stage: Stage::Discovering,
            reason: reason.into(),
        });
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn subtree_failures(&self) -> usize {
        self.errors
            .iter()
            .filter(|e| e.stage == Stage::Discovering)
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }

    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "seen {}, eligible {}, persisted {}, skipped (existing) {}, failed {}",
            self.total_candidates_seen,
            self.total_eligible,
            self.total_persisted,
            self.total_skipped_existing,
            self.total_failed
        );
        let subtrees = self.subtree_failures();
        if subtrees > 0 {
            line.push_str(&format!(", unreadable locations {subtrees}"));
        }
        if self.cancelled {
            line.push_str(" (cancelled)");
        }
        line
    }
}
