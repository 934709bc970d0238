use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// `Err(Cancelled)` once `cancel` has been tripped.
pub fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Tracks the steps of one multi-step write inside a single transaction.
///
/// A step that fails after earlier steps succeeded is reported as
/// [`Error::PartialFailureRolledBack`]; the caller drops the transaction on
/// the error path, which reverts those earlier steps.
pub struct StepLog<'a> {
    operation: &'static str,
    completed: Vec<&'static str>,
    cancel: &'a CancellationToken,
}

impl<'a> StepLog<'a> {
    pub fn new(operation: &'static str, cancel: &'a CancellationToken) -> Self {
        Self {
            operation,
            completed: Vec::new(),
            cancel,
        }
    }

    pub fn run<T>(&mut self, step: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        check_cancelled(self.cancel)?;
        match f() {
            Ok(value) => {
                self.completed.push(step);
                Ok(value)
            }
            Err(err) if self.completed.is_empty() => Err(err),
            Err(err) => {
                log::warn!(
                    "{} failed at `{step}` after [{}]; rolling back: {err}",
                    self.operation,
                    self.completed.join(", ")
                );
                Err(Error::PartialFailureRolledBack {
                    operation: self.operation,
                    step,
                    source: Box::new(err),
                })
            }
        }
    }

    pub fn completed(&self) -> &[&'static str] {
        &self.completed
    }

    /// Last cancellation check before the caller commits.
    pub fn finish(self) -> Result<()> {
        check_cancelled(self.cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_first_step_failure_is_passed_through() {
        let cancel = CancellationToken::new();
        let mut steps = StepLog::new("op", &cancel);
        let err = steps
            .run("first", || -> Result<()> { Err(Error::Conflict("busy".into())) })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_later_failure_reports_rollback() {
        let cancel = CancellationToken::new();
        let mut steps = StepLog::new("op", &cancel);
        steps.run("first", || Ok(())).unwrap();
        let err = steps
            .run("second", || -> Result<()> { Err(Error::unavailable("gone")) })
            .unwrap_err();
        match err {
            Error::PartialFailureRolledBack {
                operation, step, ..
            } => {
                assert_eq!(operation, "op");
                assert_eq!(step, "second");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(steps.completed(), &["first"]);
    }

    #[test]
    fn test_cancelled_token_stops_next_step() {
        let cancel = CancellationToken::new();
        let mut steps = StepLog::new("op", &cancel);
        steps.run("first", || Ok(())).unwrap();
        cancel.cancel();
        let mut ran = false;
        let err = steps
            .run("second", || {
                ran = true;
                Ok(())
            })
            .unwrap_err();
        assert!(!ran);
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(steps.finish().is_err());
    }
}
