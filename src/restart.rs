//! Bounded retry of collaborator initialization

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::ReceiverConfig;
use crate::error::{RelayError, Result};

/// How often, and how far apart, initialization is reattempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl From<&ReceiverConfig> for RestartPolicy {
    fn from(config: &ReceiverConfig) -> Self {
        Self {
            max_retries: config.max_init_retries,
            delay: config.init_retry_delay(),
        }
    }
}

impl RestartPolicy {
    /// Run `init` until it succeeds or the retries are used up
    ///
    /// The final error is returned as `InitializationFailed` for `component`.
    pub async fn run<T, F, Fut>(&self, component: &'static str, mut init: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match init().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(component, attempt, "Initialized after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        component,
                        error = %e,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = self.delay.as_millis() as u64,
                        "Initialization failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(RelayError::InitializationFailed { component, reason }) => {
                    return Err(RelayError::InitializationFailed { component, reason });
                }
                Err(e) => return Err(RelayError::init_failed(component, e)),
            }
        }
    }
}
