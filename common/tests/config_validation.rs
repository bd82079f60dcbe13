use common::{ConfigError, LogFormat, ServiceSettings};

#[test]
fn service_settings_validate_defaults_ok() {
    let settings = ServiceSettings::default();
    assert!(settings.validate().is_ok());
    assert!(!settings.is_production());
}

#[test]
fn service_settings_validate_invalid_env() {
    let mut settings = ServiceSettings::default();
    settings.environment = "weird".into();
    assert!(settings.validate().is_err());
}

#[test]
fn service_name_bounds() {
    let mut settings = ServiceSettings::default();
    settings.service_name = "   ".into();
    assert!(matches!(
        settings.validate(),
        Err(ConfigError::InvalidValue { .. })
    ));

    settings.service_name = "x".repeat(51);
    assert!(settings.validate().is_err());

    settings.service_name = "x".repeat(50);
    assert!(settings.validate().is_ok());
}

#[test]
fn production_settings() {
    let settings = ServiceSettings {
        environment: "production".into(),
        log_format: LogFormat::Json,
        ..ServiceSettings::default()
    };
    assert!(settings.validate().is_ok());
    assert!(settings.is_production());
}

#[test]
fn config_error_messages_name_the_field() {
    let error = ConfigError::invalid("retry.max_retries", "must not exceed 20");
    assert_eq!(
        error.to_string(),
        "Invalid value for retry.max_retries: must not exceed 20"
    );
    assert!(!error.is_environment_error());
}
