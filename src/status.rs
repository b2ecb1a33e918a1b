use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Arc, Mutex};

/// Progress sink handed to the robustness suite. Cloning shares the same state,
/// so worker threads can report completed runs.
#[derive(Clone, Default)]
pub struct SuiteStatus {
    inner: Arc<Mutex<SuiteStatusData>>,
    progress_bar: Option<ProgressBar>,
}

#[derive(Default)]
struct SuiteStatusData {
    phase: String,
    total_runs: usize,
    completed_runs: usize,
    debug_notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SuiteStatusSnapshot {
    pub phase: String,
    pub total_runs: usize,
    pub completed_runs: usize,
    pub debug_notes: Option<String>,
}

impl SuiteStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SuiteStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
            progress_bar: None,
        }
    }

    /// Same sink, mirrored to a terminal progress bar.
    pub fn with_progress_bar() -> Self {
        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Self {
            progress_bar: Some(pb),
            ..Self::new()
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        let phase = phase.into();
        if let Some(pb) = &self.progress_bar {
            pb.set_message(phase.clone());
        }
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase;
        }
    }

    /// Announces how many engine runs the current suite will perform.
    pub fn set_total_runs(&self, total_runs: usize) {
        if let Some(pb) = &self.progress_bar {
            pb.set_length(total_runs as u64);
        }
        if let Ok(mut data) = self.inner.lock() {
            data.total_runs = total_runs;
            data.completed_runs = 0;
        }
    }

    pub fn record_run(&self) {
        if let Some(pb) = &self.progress_bar {
            pb.inc(1);
        }
        if let Ok(mut data) = self.inner.lock() {
            data.completed_runs += 1;
        }
    }

    pub fn set_debug_note<S: Into<String>>(&self, note: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.debug_notes = Some(note.into());
        }
    }

    pub fn finish(&self, message: &str) {
        if let Some(pb) = &self.progress_bar {
            pb.finish_with_message(message.to_string());
        }
        self.set_phase(message);
    }

    pub fn snapshot(&self) -> SuiteStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            SuiteStatusSnapshot {
                phase: data.phase.clone(),
                total_runs: data.total_runs,
                completed_runs: data.completed_runs,
                debug_notes: data.debug_notes.clone(),
            }
        } else {
            SuiteStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_runs: 0,
                completed_runs: 0,
                debug_notes: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_progress() {
        let status = SuiteStatus::new();
        let worker = status.clone();
        status.set_total_runs(3);
        worker.record_run();
        worker.record_run();
        status.set_phase("Cost stress");

        let snapshot = status.snapshot();
        assert_eq!(snapshot.phase, "Cost stress");
        assert_eq!(snapshot.total_runs, 3);
        assert_eq!(snapshot.completed_runs, 2);
    }

    #[test]
    fn finish_sets_final_phase() {
        let status = SuiteStatus::new();
        status.finish("Done");
        assert_eq!(status.snapshot().phase, "Done");
    }
}
