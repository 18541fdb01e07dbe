//! Console progress for a running experiment.

use vecsmith_core::{AttemptRecord, RepairObserver, RepairState};

/// Prints one line per attempt and per finished function.
pub struct ConsoleObserver {
    quiet: bool,
}

impl ConsoleObserver {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

pub fn attempt_line(function: &str, record: &AttemptRecord) -> String {
    let status = match record.error_type() {
        None => "success".to_string(),
        Some(error_type) => error_type.to_string(),
    };
    let speedup = record
        .outcome
        .performance
        .and_then(|p| p.speedup)
        .map(|s| format!(" speedup {:.2}x", s))
        .unwrap_or_default();
    format!("  [{}] iteration {}: {}{}", function, record.iteration, status, speedup)
}

impl RepairObserver for ConsoleObserver {
    fn on_transition(&self, function: &str, state: &RepairState) {
        if self.quiet {
            return;
        }
        match state {
            RepairState::Generating { iteration: 1 } => {
                println!("\n{}", "=".repeat(60));
                println!("Processing {}", function);
                println!("{}", "=".repeat(60));
            }
            RepairState::Aborted { .. } | RepairState::Exhausted { .. } => {
                println!("  [{}] {}", function, state);
            }
            _ => {}
        }
    }

    fn on_attempt(&self, function: &str, record: &AttemptRecord) {
        if !self.quiet {
            println!("{}", attempt_line(function, record));
        }
    }
}
