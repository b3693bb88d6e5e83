//! Scheduler configuration.

use serde::{Deserialize, Serialize};

use super::SchedulerError;

/// Construction-time settings for a [`Scheduler`](super::Scheduler).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use bgsched::scheduler::SchedulerConfig;
///
/// let config = SchedulerConfig::from_json(r#"{ "workers": 3 }"#).unwrap();
/// assert_eq!(config.workers, 3);
/// assert_eq!(config.name, "bgsched");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of callbacks that may run at the same time.
    pub workers: usize,
    /// Label attached to every log record the scheduler emits.
    pub name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            name: "bgsched".to_owned(),
        }
    }
}

impl SchedulerConfig {
    /// Parses a configuration from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Config`] if the document is malformed, or
    /// [`SchedulerError::InvalidArgument`] if it fails [`validate`](Self::validate).
    pub fn from_json(json: &str) -> Result<Self, SchedulerError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the settings describe a usable scheduler.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.workers == 0 {
            return Err(SchedulerError::InvalidArgument(
                "worker count must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}
