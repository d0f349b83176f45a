use crate::errors::IsolateError;
use crate::registry::OverrideRegistry;
use crate::reporter::TestReporter;
use crate::types::CapturedCall;
use serde::{Deserialize, Serialize};

/// What to do when replaying a record raises an error instead of an outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayPolicy {
    #[default]
    Continue,
    Abort,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub replayed: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl ReplaySummary {
    pub fn clean(&self) -> bool {
        self.failed == 0 && self.errors.is_empty()
    }
}

/// Replays `records` in capture order.
///
/// Each original receives the call site captured in the child, so failure
/// diagnostics point into the isolated closure rather than at this loop.
pub fn replay(
    registry: &OverrideRegistry,
    reporter: &mut dyn TestReporter,
    records: &[CapturedCall],
    policy: ReplayPolicy,
) -> Result<ReplaySummary, IsolateError> {
    let mut summary = ReplaySummary::default();
    for record in records {
        match replay_one(registry, reporter, record) {
            Ok(true) => {
                summary.replayed += 1;
                summary.passed += 1;
            }
            Ok(false) => {
                summary.replayed += 1;
                summary.failed += 1;
                reporter.diag("(replayed from isolated child)");
            }
            Err(err) => {
                let message = format!(
                    "error replaying {} at {}: {err}",
                    record.target,
                    record.call_site()
                );
                reporter.diag(&message);
                if policy == ReplayPolicy::Abort {
                    return Err(IsolateError::ReplayAborted(message));
                }
                summary.errors.push(message);
            }
        }
    }
    Ok(summary)
}

fn replay_one(
    registry: &OverrideRegistry,
    reporter: &mut dyn TestReporter,
    record: &CapturedCall,
) -> Result<bool, IsolateError> {
    let original = registry
        .original(&record.target)
        .ok_or_else(|| IsolateError::NotIntercepted(record.target.to_string()))?;
    original(reporter, record.call_site(), record.args())
}
