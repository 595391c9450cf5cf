//! Loading configuration from YAML files

use super::schema::TrainSpec;
use super::training::TrainingConfig;
use super::validate::{validate_config, ConfigError};
use std::fs;
use std::path::Path;

/// Read the raw training spec from a YAML file without validating it
pub fn load_spec<P: AsRef<Path>>(config_path: P) -> Result<TrainSpec, ConfigError> {
    let yaml_content = fs::read_to_string(config_path.as_ref()).map_err(|e| ConfigError::Read {
        path: config_path.as_ref().display().to_string(),
        reason: e.to_string(),
    })?;

    serde_yaml::from_str(&yaml_content).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Load and validate a training configuration
///
/// # Example
///
/// ```no_run
/// use clasificar::config::load_config;
///
/// let config = load_config("hyp.yaml")?;
/// println!("training for {} epochs", config.epochs);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<TrainingConfig, ConfigError> {
    let spec = load_spec(config_path)?;
    let config = validate_config(&spec)?;

    tracing::debug!(
        epochs = config.epochs,
        warmup_epochs = config.warmup_epochs,
        aug_epoch = config.aug_epoch,
        loss = config.loss.name(),
        progressive = config.progressive_learning(),
        "configuration loaded"
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_valid_config() {
        let yaml = r#"
data:
  image_size: [224, 224]
  num_classes: 5

hyp:
  epochs: 10
  warmup_epochs: 2
  aug_epoch: 8
  base_lr: 0.01
  loss_mode: cross_entropy
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.epochs, 10);
        assert_eq!(config.warmup_epochs, 2);
    }

    #[test]
    fn test_load_invalid_config() {
        let yaml = r#"
data:
  image_size: [224, 224]
  num_classes: 5

hyp:
  epochs: 10
  aug_epoch: 12
  base_lr: 0.01
  loss_mode: cross_entropy
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();

        let err = load_config(temp_file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::AugEpochOutOfRange { .. }));
    }

    #[test]
    fn test_load_malformed_yaml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"this is not valid yaml: [}")
            .unwrap();

        let err = load_config(temp_file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config("/nonexistent/clasificar.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
