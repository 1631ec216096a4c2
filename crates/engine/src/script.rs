use crate::command::{CommandKind, Handle};
use crate::dispatch::Dispatcher;
use crate::drivers::DriverKind;
use crate::error::{EdgeError, Result};
use crate::normalize::normalize;
use serde::Serialize;
use tracing::{debug, info};

/// Totals of a completed script run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScriptReport {
    /// Batches sent to the backend.
    pub batches: usize,
    pub rowcount: u64,
}

impl Dispatcher {
    /// Split `script` into batches and run them in order as non-queries on
    /// `handle`. The first failing batch stops the run.
    pub async fn run_script(
        &self,
        driver: DriverKind,
        handle: Handle,
        script: &str,
    ) -> Result<ScriptReport> {
        let session = self.session_for(driver, handle)?;
        let batches = self.config().splitter(script).split();
        let mut report = ScriptReport::default();

        for (index, batch) in batches.iter().enumerate() {
            if batch.is_blank() {
                continue;
            }
            debug!(
                handle = handle.get(),
                batch = index + 1,
                line = batch.lineno,
                "running batch"
            );
            let statements = session
                .run(&batch.content, CommandKind::NonQuery)
                .await
                .map_err(|e| EdgeError::Batch {
                    index: index + 1,
                    line: batch.lineno,
                    source: Box::new(e),
                })?;
            report.batches += 1;
            report.rowcount += normalize(CommandKind::NonQuery, statements)
                .rowcount()
                .unwrap_or_default();
        }

        info!(
            handle = handle.get(),
            batches = report.batches,
            rowcount = report.rowcount,
            "script finished"
        );
        Ok(report)
    }
}
