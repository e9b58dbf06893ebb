    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = ConfigValidator::validate(&config);
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_validate_inverted_priority_bounds() {
        let mut config = Config::default();
        config.queue.min_priority = 9;
        config.queue.max_priority = 2;

        let result = ConfigValidator::validate(&config);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.path == "queue.max_priority"));
    }

    #[test]
    fn test_validate_default_priority_out_of_bounds() {
        let mut config = Config::default();
        config.queue.default_priority = 11;

        let result = ConfigValidator::validate(&config);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.path == "queue.default_priority"));
    }

    #[test]
    fn test_validate_unbounded_queue_warning() {
        let mut config = Config::default();
        config.queue.max_queue_size = 0;

        let result = ConfigValidator::validate(&config);
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.path == "queue.max_queue_size"));
    }

    #[test]
    fn test_validate_zero_retention_warning() {
        let mut config = Config::default();
        config.queue.retention_days = 0;

        let result = ConfigValidator::validate(&config);
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.path == "queue.retention_days"));
    }

    #[test]
    fn test_validate_empty_data_dir() {
        let mut config = Config::default();
        config.storage.data_dir = PathBuf::new();

        let result = ConfigValidator::validate(&config);
        assert!(result.errors.iter().any(|e| e.path == "storage.data_dir"));
    }

    #[test]
    fn test_validate_zero_backup_retention() {
        let mut config = Config::default();
        config.storage.backup_retention = 0;

        let result = ConfigValidator::validate(&config);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.path == "storage.backup_retention"));
    }

    #[test]
    fn test_validate_zero_lock_timeout() {
        let mut config = Config::default();
        config.lock.timeout_secs = 0;

        let result = ConfigValidator::validate(&config);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.path == "lock.timeout_secs"));
    }

    #[test]
    fn test_validate_long_lock_timeout_warning() {
        let mut config = Config::default();
        config.lock.timeout_secs = 3600;

        let result = ConfigValidator::validate(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = Config::default();
        config.storage.backup_retention = 0;
        config.lock.timeout_secs = 0;

        let result = ConfigValidator::validate(&config);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_validation_error_new() {
        let err = ValidationError::new("queue.max_retries", "too many");
        assert_eq!(err.path, "queue.max_retries");
        assert_eq!(err.message, "too many");
    }
