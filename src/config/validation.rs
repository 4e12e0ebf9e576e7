//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("realm.guild_id must be non-zero")]
    MissingGuildId,
    #[error("realm.spawn_channel_ids must name at least one channel")]
    NoSpawnChannels,
    #[error("channel {0} is both a spawn channel and excluded")]
    SpawnChannelExcluded(u64),
    #[error("rooms.room_name_template must contain {{display_name}}")]
    TemplateMissingPlaceholder,
    #[error("rooms.max_concurrent_rooms must be non-zero")]
    ZeroRoomCap,
    #[error("reconcile.period_s must be non-zero")]
    ZeroReconcilePeriod,
    #[error("rate_limit.time_window_ms must be non-zero")]
    ZeroRateWindow,
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.realm.guild_id == 0 {
        errors.push(ValidationError::MissingGuildId);
    }
    if config.realm.spawn_channel_ids.is_empty() {
        errors.push(ValidationError::NoSpawnChannels);
    }
    for id in &config.realm.spawn_channel_ids {
        if config.realm.excluded_channel_ids.contains(id) {
            errors.push(ValidationError::SpawnChannelExcluded(*id));
        }
    }

    if !config.rooms.room_name_template.contains("{display_name}") {
        errors.push(ValidationError::TemplateMissingPlaceholder);
    }
    if config.rooms.max_concurrent_rooms == 0 {
        errors.push(ValidationError::ZeroRoomCap);
    }
    if config.reconcile.period_s == 0 {
        errors.push(ValidationError::ZeroReconcilePeriod);
    }
    if config.rate_limit.time_window_ms == 0 {
        errors.push(ValidationError::ZeroRateWindow);
    }

    let db_path = Path::new(&config.database.path);
    if config.database.path != ":memory:"
        && let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        errors.push(ValidationError::DatabasePathInvalid(
            config.database.path.clone(),
        ));
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        toml::from_str(
            r#"
            [realm]
            guild_id = 42
            spawn_channel_ids = [100]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn zero_guild_id_rejected() {
        let mut config = valid_config();
        config.realm.guild_id = 0;
        let errors = validate(&config).unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::MissingGuildId))
        );
    }

    #[test]
    fn spawn_in_excluded_rejected() {
        let mut config = valid_config();
        config.realm.excluded_channel_ids = vec![100];
        let errors = validate(&config).unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::SpawnChannelExcluded(100)))
        );
    }

    #[test]
    fn template_without_placeholder_rejected() {
        let mut config = valid_config();
        config.rooms.room_name_template = "Voice Room".to_string();
        let errors = validate(&config).unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::TemplateMissingPlaceholder))
        );
    }

    #[test]
    fn all_errors_reported_together() {
        let mut config = valid_config();
        config.realm.guild_id = 0;
        config.realm.spawn_channel_ids.clear();
        config.reconcile.period_s = 0;
        let errors = validate(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
