use crate::{SchedulerError, SchedulerResult};

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> SchedulerResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> SchedulerResult<()> {
        if value.trim().is_empty() {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that an interval is reasonable
    pub fn validate_interval_seconds(seconds: u64, field_name: &str) -> SchedulerResult<()> {
        if seconds == 0 {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if seconds > 3600 {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} must be less than or equal to 3600"
            )));
        }
        Ok(())
    }

    /// Validate that a count is within (0, max]
    pub fn validate_count(count: usize, field_name: &str, max: usize) -> SchedulerResult<()> {
        if count == 0 {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > max {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} must be less than or equal to {max}"
            )));
        }
        Ok(())
    }

    /// Validate a `host:port` address
    pub fn validate_socket_address(address: &str, field_name: &str) -> SchedulerResult<()> {
        Self::validate_not_empty(address, field_name)?;
        match address.rsplit_once(':') {
            Some((_, port)) if port.parse::<u16>().is_ok() => Ok(()),
            _ => Err(SchedulerError::Configuration(format!(
                "{field_name} must be in host:port form, got '{address}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_socket_address() {
        assert!(ValidationUtils::validate_socket_address("0.0.0.0:8080", "bind").is_ok());
        assert!(ValidationUtils::validate_socket_address("coordinator:0", "bind").is_ok());
        assert!(ValidationUtils::validate_socket_address("coordinator", "bind").is_err());
        assert!(ValidationUtils::validate_socket_address("host:http", "bind").is_err());
        assert!(ValidationUtils::validate_socket_address("", "bind").is_err());
    }

    #[test]
    fn test_validate_count() {
        assert!(ValidationUtils::validate_count(5, "pool_size", 1000).is_ok());
        assert!(ValidationUtils::validate_count(0, "pool_size", 1000).is_err());
        assert!(ValidationUtils::validate_count(1001, "pool_size", 1000).is_err());
    }
}
