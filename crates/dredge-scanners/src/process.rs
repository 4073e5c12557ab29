//! External-command scanner.
//!
//! Spawns a configured command with the target URL appended and expects a
//! JSON array of vulnerability records on stdout. Any process-level
//! problem (spawn failure, non-zero exit, unparseable output) is an
//! ordinary scan failure, reported through the sentinel outcome.

use crate::{Result, ScanOutcome, Scanner};
use async_trait::async_trait;
use dredge_core::{ModuleArgs, Target, Vulnerability};
use tokio::process::Command;

/// Registered plugin name.
pub const NAME: &str = "process";

/// Runs an external command-line scanner against each target.
pub struct ProcessScanner {
    command: String,
    args: Vec<String>,
}

impl ProcessScanner {
    /// Construct the scanner from module arguments.
    ///
    /// Options: `path` (required, the scanner binary), `args`
    /// (space-delimited extra arguments placed before the URL).
    pub fn from_args(args: &ModuleArgs) -> Result<Self> {
        let command = args.require("path")?;
        let extra = args
            .get("args")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        Ok(Self {
            command,
            args: extra,
        })
    }
}

/// Registry constructor.
pub fn build(args: &ModuleArgs) -> Result<Box<dyn Scanner>> {
    Ok(Box::new(ProcessScanner::from_args(args)?))
}

#[async_trait]
impl Scanner for ProcessScanner {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn scan(&self, target: &Target) -> ScanOutcome {
        let output = match Command::new(&self.command)
            .args(&self.args)
            .arg(target.url())
            .output()
            .await
        {
            Ok(output) => output,
            Err(error) => {
                tracing::warn!(command = %self.command, %error, "failed to launch scanner");
                return ScanOutcome::Failed;
            }
        };

        if !output.status.success() {
            tracing::warn!(
                command = %self.command,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "scanner exited with failure"
            );
            return ScanOutcome::Failed;
        }

        match serde_json::from_slice::<Vec<Vulnerability>>(&output.stdout) {
            Ok(vulnerabilities) => ScanOutcome::Completed(vulnerabilities),
            Err(error) => {
                tracing::warn!(command = %self.command, %error, "scanner output was not a vulnerability list");
                ScanOutcome::Failed
            }
        }
    }
}
