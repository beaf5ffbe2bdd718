//! Progress reporting for apply runs.

use tracing::{info, warn};

/// Advanced once per action regardless of outcome.
pub trait ProgressIndicator: Send {
    fn set_total(&mut self, total: usize);

    fn advance(&mut self, action: &str);

    fn done(&mut self, success: bool);
}

#[derive(Debug, Default)]
pub struct NoopProgress;

impl ProgressIndicator for NoopProgress {
    fn set_total(&mut self, _total: usize) {}

    fn advance(&mut self, _action: &str) {}

    fn done(&mut self, _success: bool) {}
}

/// Logs progress through `tracing`.
#[derive(Debug, Default)]
pub struct TracingProgress {
    total: usize,
    current: usize,
}

impl ProgressIndicator for TracingProgress {
    fn set_total(&mut self, total: usize) {
        self.total = total;
        self.current = 0;
        info!(total, "Applying actions");
    }

    fn advance(&mut self, action: &str) {
        self.current += 1;
        info!(
            "[{}/{}] {}",
            self.current, self.total, action
        );
    }

    fn done(&mut self, success: bool) {
        if success {
            info!(applied = self.current, "All actions applied");
        } else {
            warn!(applied = self.current, "Apply finished with errors");
        }
    }
}
