use serde::{Deserialize, Serialize};

use crate::error::CoprocError;

pub const DEFAULT_BATCH_FACTOR: u64 = 1;
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 64;
pub const DEFAULT_WORKER_THREAD_NAME: &str = "virtine-coproc";
pub const DEFAULT_MEMORY_SIZE: u64 = 16 * 1024 * 1024;

/// Device construction parameters.
///
/// Every field has a default, so a partial JSON document (or `{}`) is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoprocConfig {
    /// Initial value of the BATCH_FACTOR register.
    pub batch_factor: u64,
    /// Pending notifications held before further ones are coalesced.
    pub notification_capacity: usize,
    pub worker_thread_name: String,
    /// Size of the simulated virtine memory, in bytes.
    pub memory_size: u64,
}

impl Default for CoprocConfig {
    fn default() -> Self {
        Self {
            batch_factor: DEFAULT_BATCH_FACTOR,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
            memory_size: DEFAULT_MEMORY_SIZE,
        }
    }
}

impl CoprocConfig {
    pub fn validate(&self) -> Result<(), CoprocError> {
        if self.notification_capacity == 0 {
            return Err(CoprocError::InvalidConfig(
                "notification_capacity must be greater than zero",
            ));
        }
        if self.worker_thread_name.is_empty() {
            return Err(CoprocError::InvalidConfig("worker_thread_name must not be empty"));
        }
        if self.memory_size == 0 {
            return Err(CoprocError::InvalidConfig("memory_size must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: CoprocConfig = serde_json::from_str(r#"{ "batch_factor": 8 }"#).unwrap();
        assert_eq!(cfg.batch_factor, 8);
        assert_eq!(cfg.notification_capacity, DEFAULT_NOTIFICATION_CAPACITY);
        assert_eq!(cfg.worker_thread_name, DEFAULT_WORKER_THREAD_NAME);
        cfg.validate().unwrap();
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<CoprocConfig>(r#"{ "batch": 8 }"#).is_err());
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let cfg = CoprocConfig {
            notification_capacity: 0,
            ..CoprocConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(CoprocError::InvalidConfig(_))));
    }
}
