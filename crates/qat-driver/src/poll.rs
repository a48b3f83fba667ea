//! Bounded status polling.
//!
//! One helper serves CSR busy waits, cycle waits, reset read-back, FCU
//! commands and memory auto-init. Each sample is classified by the caller;
//! when the budget runs out the last raw value is logged and returned in a
//! [`QatError::HardwareTimeout`].

use std::time::Duration;

use crate::error::{QatError, Result};

/// Verdict on one sampled status value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// Finished with a result.
    Done(T),
    /// Hardware reported failure.
    Failed,
    /// Not yet; sample again.
    Pending,
}

/// Poll parameters.
#[derive(Debug, Clone, Copy)]
pub struct Poll<'a> {
    /// Operation name for logs and errors.
    pub operation: &'a str,
    /// Maximum samples.
    pub retries: u32,
    /// Sleep before each sample.
    pub delay: Duration,
}

impl<'a> Poll<'a> {
    /// Busy poll without sleeping.
    #[must_use]
    pub const fn busy(operation: &'a str, retries: u32) -> Self {
        Self {
            operation,
            retries,
            delay: Duration::ZERO,
        }
    }

    /// Poll with a fixed sleep before each sample.
    #[must_use]
    pub const fn sleeping(operation: &'a str, retries: u32, delay: Duration) -> Self {
        Self {
            operation,
            retries,
            delay,
        }
    }

    /// Sample with `read` and classify with `check` until it settles or the
    /// budget runs out.
    ///
    /// # Errors
    ///
    /// [`QatError::HardwareFault`] when `check` reports failure,
    /// [`QatError::HardwareTimeout`] when the budget is exhausted, and any
    /// error `read` returns.
    pub fn run<T>(
        &self,
        mut read: impl FnMut() -> Result<u32>,
        mut check: impl FnMut(u32) -> Step<T>,
    ) -> Result<T> {
        let mut last = 0;
        for _ in 0..self.retries {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            last = read()?;
            match check(last) {
                Step::Done(v) => return Ok(v),
                Step::Failed => {
                    tracing::error!("{} failed, status {last:#010x}", self.operation);
                    return Err(QatError::fault(self.operation, last));
                }
                Step::Pending => {}
            }
        }
        tracing::error!(
            "{} timed out after {} polls, last status {last:#010x}",
            self.operation,
            self.retries
        );
        Err(QatError::timeout(self.operation, last, self.retries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settles_on_first_matching_sample() {
        let mut n = 0;
        let polls = Poll::busy("count", 10)
            .run(
                || {
                    n += 1;
                    Ok(n)
                },
                |v| if v == 3 { Step::Done(v) } else { Step::Pending },
            )
            .unwrap();
        assert_eq!(polls, 3);
    }

    #[test]
    fn timeout_reports_last_status_and_budget() {
        let err = Poll::busy("stuck", 4)
            .run(|| Ok(0xabcd), |_| Step::<()>::Pending)
            .unwrap_err();
        match err {
            QatError::HardwareTimeout {
                operation,
                last_status,
                retries,
            } => {
                assert_eq!(operation, "stuck");
                assert_eq!(last_status, 0xabcd);
                assert_eq!(retries, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn failure_stops_polling() {
        let mut reads = 0;
        let err = Poll::busy("verify", 10)
            .run(
                || {
                    reads += 1;
                    Ok(3)
                },
                |_| Step::<()>::Failed,
            )
            .unwrap_err();
        assert!(matches!(err, QatError::HardwareFault { status: 3, .. }));
        assert_eq!(reads, 1);
    }

    #[test]
    fn zero_budget_times_out_without_reading() {
        let err = Poll::busy("none", 0)
            .run(|| panic!("must not read"), |_| Step::<()>::Pending)
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
