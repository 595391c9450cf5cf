use clasificar::config::TrainingConfig;
use clasificar::train::{resolve, Batch, MixupController, Phase, Targets};
use ndarray::Array2;
use proptest::collection::vec;
use proptest::prelude::*;

/// (epochs, warmup_epochs, aug_epoch) with room for three derived stages
fn windows() -> impl Strategy<Value = (usize, usize, usize)> {
    (4usize..200).prop_flat_map(|epochs| {
        (0usize..=(epochs - 3).min(10)).prop_flat_map(move |warmup| {
            ((warmup + 3)..=epochs).prop_map(move |aug| (epochs, warmup, aug))
        })
    })
}

fn config(
    epochs: usize,
    warmup: usize,
    aug: usize,
    progressive: bool,
    decay: &str,
) -> TrainingConfig {
    TrainingConfig::from_yaml_str(&format!(
        r#"
data: {{ image_size: [96, 128], num_classes: 5 }}
hyp:
  epochs: {epochs}
  warmup_epochs: {warmup}
  aug_epoch: {aug}
  base_lr: 0.1
  final_lr_ratio: 0.05
  lr_decay: {decay}
  loss_mode: cross_entropy
  strategy:
    progressive_learning: {progressive}
"#
    ))
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    // =============================================================================
    // Stage Resolver
    // =============================================================================

    #[test]
    fn prop_resolve_is_pure(
        (epochs, warmup, aug) in windows(),
        progressive in any::<bool>(),
        epoch in 0usize..250,
    ) {
        let cfg = config(epochs, warmup, aug, progressive, "cosine");
        prop_assert_eq!(resolve(epoch, &cfg), resolve(epoch, &cfg));
    }

    #[test]
    fn prop_no_augmentation_from_aug_epoch(
        (epochs, warmup, aug) in windows(),
        progressive in any::<bool>(),
    ) {
        let cfg = config(epochs, warmup, aug, progressive, "cosine");
        for epoch in aug..epochs {
            prop_assert!(!resolve(epoch, &cfg).augmentation_enabled, "epoch {}", epoch);
        }
    }

    #[test]
    fn prop_tail_is_clean_and_full_size(
        (epochs, warmup, aug) in windows(),
    ) {
        let cfg = config(epochs, warmup, aug, true, "cosine");
        for epoch in aug..epochs {
            let plan = resolve(epoch, &cfg);
            prop_assert_eq!(plan.phase, Phase::Clean);
            prop_assert_eq!(plan.mixup_alpha, 0.0);
            prop_assert_eq!(plan.image_size, cfg.image_size);
        }
    }

    #[test]
    fn prop_progressive_window_is_augmented(
        (epochs, warmup, aug) in windows(),
    ) {
        let cfg = config(epochs, warmup, aug, true, "linear");
        for epoch in warmup..aug {
            let plan = resolve(epoch, &cfg);
            prop_assert!(plan.augmentation_enabled);
            prop_assert!(matches!(plan.phase, Phase::Progressive { .. }), "expected Progressive phase");
            prop_assert!(plan.image_size.height <= cfg.image_size.height);
        }
    }

    #[test]
    fn prop_warmup_disables_augmentation(
        (epochs, warmup, aug) in windows(),
        progressive in any::<bool>(),
    ) {
        let cfg = config(epochs, warmup, aug, progressive, "cosine");
        for epoch in 0..warmup {
            let plan = resolve(epoch, &cfg);
            prop_assert!(plan.is_warmup);
            prop_assert!(!plan.augmentation_enabled);
            prop_assert_eq!(plan.mixup_alpha, 0.0);
        }
    }

    // =============================================================================
    // LR Curve
    // =============================================================================

    #[test]
    fn prop_lr_boundaries(
        (epochs, warmup, aug) in windows(),
        cosine in any::<bool>(),
    ) {
        let cfg = config(epochs, warmup, aug, false, if cosine { "cosine" } else { "linear" });

        if warmup > 0 {
            prop_assert_eq!(resolve(0, &cfg).lr, 0.0);
        }
        prop_assert!((resolve(warmup, &cfg).lr - 0.1).abs() < 1e-6);
        if epochs - 1 > warmup {
            let last = resolve(epochs - 1, &cfg).lr;
            prop_assert!((last - 0.1 * 0.05).abs() < 1e-6, "last lr {}", last);
        }
    }

    #[test]
    fn prop_lr_bounded_and_decaying(
        (epochs, warmup, aug) in windows(),
        cosine in any::<bool>(),
    ) {
        let cfg = config(epochs, warmup, aug, false, if cosine { "cosine" } else { "linear" });
        let lrs: Vec<f32> = (0..epochs).map(|e| resolve(e, &cfg).lr).collect();

        for lr in &lrs {
            prop_assert!(*lr >= 0.0 && *lr <= 0.1 + 1e-6);
        }
        for pair in lrs[warmup..].windows(2) {
            prop_assert!(pair[1] <= pair[0] + 1e-6);
        }
    }

    // =============================================================================
    // Mixup
    // =============================================================================

    #[test]
    fn prop_zero_alpha_mixup_is_identity(
        values in vec(-10.0f32..10.0, 12),
        classes in vec(0usize..5, 4),
        seed in any::<u64>(),
        epoch in 0usize..100,
        step in 0usize..100,
    ) {
        let images = Array2::from_shape_vec((4, 3), values).unwrap();
        let batch = Batch::new(images, Targets::Classes(classes)).unwrap();
        let controller = MixupController::new(seed, 1.0);

        let mixed = controller
            .apply(batch.clone(), 0.0, &mut controller.rng_for(epoch, step))
            .unwrap();

        prop_assert_eq!(&mixed.images, &batch.images);
        prop_assert_eq!(&mixed.targets.targets_a, &batch.targets);
        prop_assert_eq!(&mixed.targets.targets_b, &batch.targets);
        prop_assert_eq!(mixed.lambda(), 1.0);
    }
}
