//! Retry budgets and poll delays.
//!
//! Every bounded loop in the HAL reads its limit from [`HalConfig`]. The
//! defaults match production firmware loading; tests shrink the FCU delay
//! to zero so timeouts resolve instantly.

use std::time::Duration;

/// Retry budgets and delays for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalConfig {
    /// Local-CSR busy-bit polls per access.
    pub csr_retries: u32,
    /// Cycle-counter polls for liveness checks and micro-program waits.
    pub ae_retries: u32,
    /// FCU status polls per AUTH, LOAD or START command.
    pub fcu_retries: u32,
    /// Sleep before each FCU status poll.
    pub fcu_delay: Duration,
    /// Read-backs while clearing reset.
    pub reset_retries: u32,
    /// Polls of the on-card memory auto-init flag.
    pub esram_retries: u32,
    /// Minimum elapsed cycles for a liveness check or a finished program.
    pub min_alive_cycles: u32,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            csr_retries: 500,
            ae_retries: 10_000,
            fcu_retries: 300,
            fcu_delay: Duration::from_millis(10),
            reset_retries: 100,
            esram_retries: 100,
            min_alive_cycles: 8,
        }
    }
}

impl HalConfig {
    /// Defaults overridden by `QAT_FCU_RETRIES`, `QAT_FCU_DELAY_MS`,
    /// `QAT_CSR_RETRIES` and `QAT_AE_RETRIES` where set.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| -> Option<u32> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Ignoring {key}={raw:?}: {e}");
                    None
                }
            }
        };
        if let Some(v) = read("QAT_FCU_RETRIES") {
            self.fcu_retries = v;
        }
        if let Some(v) = read("QAT_FCU_DELAY_MS") {
            self.fcu_delay = Duration::from_millis(u64::from(v));
        }
        if let Some(v) = read("QAT_CSR_RETRIES") {
            self.csr_retries = v;
        }
        if let Some(v) = read("QAT_AE_RETRIES") {
            self.ae_retries = v;
        }
        self
    }

    /// Set the FCU retry budget.
    #[must_use]
    pub const fn with_fcu_retries(mut self, retries: u32) -> Self {
        self.fcu_retries = retries;
        self
    }

    /// Set the FCU poll delay.
    #[must_use]
    pub const fn with_fcu_delay(mut self, delay: Duration) -> Self {
        self.fcu_delay = delay;
        self
    }

    /// Set the local-CSR retry budget.
    #[must_use]
    pub const fn with_csr_retries(mut self, retries: u32) -> Self {
        self.csr_retries = retries;
        self
    }

    /// Set the cycle-wait retry budget.
    #[must_use]
    pub const fn with_ae_retries(mut self, retries: u32) -> Self {
        self.ae_retries = retries;
        self
    }

    /// Set the reset read-back budget.
    #[must_use]
    pub const fn with_reset_retries(mut self, retries: u32) -> Self {
        self.reset_retries = retries;
        self
    }
}
