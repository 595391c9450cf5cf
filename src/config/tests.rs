//! Integration tests for config module

use super::*;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_end_to_end_config_loading() {
    let yaml = r#"
seed: 3

data:
  image_size: [224, 224]
  num_classes: 5

hyp:
  epochs: 100
  warmup_epochs: 3
  aug_epoch: 80
  base_lr: 0.01
  layer_lr:
    head: 10.0
  loss_mode: cross_entropy
  label_smoothing: 0.1
  strategy:
    progressive_learning: true
    progressive_stages:
      - { epoch_range: [3, 35], image_size_ratio: 0.5, mixup_alpha: 0.0 }
      - { epoch_range: [35, 70], image_size_ratio: 0.75, mixup_alpha: 0.1 }
      - { epoch_range: [70, 80], image_size_ratio: 1.0, mixup_alpha: 0.2 }
    ohem:
      enabled: true
      min_kept: 8
      prob_threshold: 0.7

ema:
  decay: 0.999
"#;

    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(yaml.as_bytes()).unwrap();

    let config = load_config(temp_file.path()).unwrap();

    assert_eq!(config.seed, 3);
    assert_eq!(config.image_size, ImageSize::new(224, 224));
    assert_eq!(config.lr_multiplier("head"), 10.0);
    assert_eq!(config.lr_multiplier("backbone"), 1.0);
    assert_eq!(config.loss.name(), "CrossEntropy+OHEM");
    assert_eq!(config.ema.map(|e| e.decay), Some(0.999));

    let schedule = config.progressive.as_ref().unwrap();
    assert_eq!(schedule.stage_at(50).unwrap().image_size_ratio, 0.75);
    assert!(schedule.stage_at(85).is_none());
}

#[test]
fn test_from_yaml_str_matches_load_config() {
    let yaml = r#"
data: { image_size: [64, 48], num_classes: 3 }
hyp: { epochs: 10, warmup_epochs: 2, aug_epoch: 8, base_lr: 0.1, loss_mode: binary_cross_entropy }
"#;

    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(yaml.as_bytes()).unwrap();

    let from_file = load_config(temp_file.path()).unwrap();
    let from_str = TrainingConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(from_file, from_str);
}

#[test]
fn test_config_error_names_field() {
    let yaml = r#"
data: { image_size: [64, 64], num_classes: 3 }
hyp:
  epochs: 10
  aug_epoch: 8
  base_lr: 0.1
  loss_mode: cross_entropy
  label_smoothing: 1.5
"#;

    let err = TrainingConfig::from_yaml_str(yaml).unwrap_err();
    assert!(err.to_string().contains("hyp.label_smoothing"));
}

#[test]
fn test_focal_under_cross_entropy_fails_at_load() {
    let yaml = r#"
data: { image_size: [64, 64], num_classes: 3 }
hyp:
  epochs: 10
  aug_epoch: 8
  base_lr: 0.1
  loss_mode: cross_entropy
  strategy:
    focal: { enabled: true }
"#;

    assert_eq!(
        TrainingConfig::from_yaml_str(yaml),
        Err(ConfigError::FocalRequiresBce)
    );
}

#[test]
fn test_validated_config_serializes_for_reports() {
    let yaml = r#"
data: { image_size: [32, 32], num_classes: 4 }
hyp:
  epochs: 12
  warmup_epochs: 1
  aug_epoch: 10
  base_lr: 0.05
  optimizer: sam
  sam_rho: 0.1
  loss_mode: binary_cross_entropy
  multi_label: true
  strategy:
    progressive_learning: true
    focal: { enabled: true, gamma: 1.0 }
"#;

    let config = TrainingConfig::from_yaml_str(yaml).unwrap();
    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["optimizer"]["kind"], "sam");
    assert_eq!(json["loss"]["mode"], "binary_cross_entropy");
    assert_eq!(json["progressive"]["stages"].as_array().map(Vec::len), Some(3));
}

#[test]
fn test_negative_ignore_index_parses() {
    let yaml = r#"
data: { image_size: [32, 32], num_classes: 4 }
hyp:
  epochs: 12
  aug_epoch: 10
  base_lr: 0.05
  loss_mode: cross_entropy
  strategy:
    ohem: { enabled: true, ignore_index: -100 }
"#;

    let config = TrainingConfig::from_yaml_str(yaml).unwrap();
    match config.loss {
        LossMode::CrossEntropy {
            ohem: Some(ohem), ..
        } => assert_eq!(ohem.ignore_index, -100),
        other => panic!("expected OHEM, got {other:?}"),
    }
}
