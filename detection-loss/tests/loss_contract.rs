//! Calling-convention checks shared by every loss.

use anyhow::Result;
use burn::{
    backend::NdArray,
    config::Config,
    tensor::{Distribution, Int, Tensor},
};
use detection_loss::*;

type TestBackend = NdArray;

fn random(shape: [usize; 2]) -> Tensor<TestBackend, 2> {
    Tensor::random(shape, Distribution::Default, &Default::default())
}

fn labels() -> Tensor<TestBackend, 1, Int> {
    Tensor::from_ints([0, 1, 2, 3, 4, 4, 3, 2, 1, 0], &Default::default())
}

fn rejects_non_enumerated_reduction<C: Config>(config: C) -> Result<()> {
    let mut value = serde_json::to_value(&config)?;

    value["reduction"] = serde_json::Value::Bool(true);
    assert!(serde_json::from_value::<C>(value.clone()).is_err());

    value["reduction"] = "sum".into();
    serde_json::from_value::<C>(value)?;
    Ok(())
}

#[test]
fn textual_reduction_override_must_be_enumerated() -> Result<()> {
    assert_eq!(LossReduction::parse_override(None)?, None);
    for (text, reduction) in [
        ("none", LossReduction::None),
        ("mean", LossReduction::Mean),
        ("sum", LossReduction::Sum),
    ] {
        assert_eq!(LossReduction::parse_override(Some(text))?, Some(reduction));
    }

    let err = LossReduction::parse_override(Some("True")).unwrap_err();
    assert_eq!(
        err,
        LossError::InvalidReduction {
            value: "True".to_string()
        }
    );
    Ok(())
}

macro_rules! invalid_reduction_contract {
    ($($name:ident: $config:expr,)*) => {$(
        #[test]
        fn $name() -> Result<()> {
            rejects_non_enumerated_reduction($config)
        }
    )*};
}

invalid_reduction_contract! {
    balanced_l1_rejects_boolean_reduction: BalancedL1LossConfig::new(),
    bounded_iou_rejects_boolean_reduction: BoundedIoULossConfig::new(),
    ciou_rejects_boolean_reduction: CIoULossConfig::new(),
    cross_entropy_rejects_boolean_reduction: CrossEntropyLossConfig::new(),
    binary_cross_entropy_rejects_boolean_reduction: BinaryCrossEntropyLossConfig::new(),
    diou_rejects_boolean_reduction: DIoULossConfig::new(),
    focal_rejects_boolean_reduction: FocalLossConfig::new(),
    distribution_focal_rejects_boolean_reduction: DistributionFocalLossConfig::new(),
    mse_rejects_boolean_reduction: MseLossConfig::new(),
    seesaw_rejects_boolean_reduction: SeesawLossConfig::new(),
    gaussian_focal_rejects_boolean_reduction: GaussianFocalLossConfig::new(),
    giou_rejects_boolean_reduction: GIoULossConfig::new(),
    iou_rejects_boolean_reduction: IoULossConfig::new(),
    l1_rejects_boolean_reduction: L1LossConfig::new(),
    quality_focal_rejects_boolean_reduction: QualityFocalLossConfig::new(),
    varifocal_rejects_boolean_reduction: VarifocalLossConfig::new(),
    ghmr_rejects_boolean_reduction: GhmRConfig::new(),
    ghmc_rejects_boolean_reduction: GhmCConfig::new(),
    smooth_l1_rejects_boolean_reduction: SmoothL1LossConfig::new(),
    kd_rejects_boolean_reduction: KnowledgeDistillationKlDivLossConfig::new(),
}

macro_rules! zero_weight_contract {
    ($($name:ident: $loss:ty,)*) => {$(
        #[test]
        fn $name() -> Result<()> {
            let weight = Tensor::<TestBackend, 1>::zeros([10], &Default::default());

            let loss = <$loss>::new().forward(
                random([10, 4]),
                random([10, 4]),
                Some(weight.into()),
                None,
                None,
            )?;

            assert!(loss.is_reduced());
            assert_eq!(loss.total(), 0.0);
            Ok(())
        }
    )*};
}

zero_weight_contract! {
    iou_zero_weight_is_exactly_zero: IoULoss,
    bounded_iou_zero_weight_is_exactly_zero: BoundedIoULoss,
    giou_zero_weight_is_exactly_zero: GIoULoss,
    diou_zero_weight_is_exactly_zero: DIoULoss,
    ciou_zero_weight_is_exactly_zero: CIoULoss,
}

macro_rules! zero_weight_unreduced_contract {
    ($($name:ident: $loss:ty,)*) => {$(
        #[test]
        fn $name() -> Result<()> {
            let device = Default::default();
            let pred = Tensor::<TestBackend, 2>::from_floats(
                [[0.0, 0.0, 2.0, 2.0], [1.0, 1.0, 3.0, 4.0], [0.0, 0.0, 1.0, 1.0]],
                &device,
            );
            let target = Tensor::<TestBackend, 2>::from_floats(
                [[1.0, 0.0, 3.0, 2.0], [1.0, 2.0, 3.0, 5.0], [0.5, 0.5, 1.5, 1.5]],
                &device,
            );
            let weight = Tensor::<TestBackend, 1>::zeros([3], &device);

            let loss = <$loss>::new().forward(
                pred,
                target,
                Some(weight.into()),
                Some(LossReduction::None),
                None,
            )?;

            assert!(!loss.is_reduced());
            assert_eq!(loss.dims(), vec![3]);
            assert_eq!(loss.total(), 0.0);
            Ok(())
        }
    )*};
}

zero_weight_unreduced_contract! {
    iou_zero_weight_keeps_per_box_shape: IoULoss,
    giou_zero_weight_keeps_per_box_shape: GIoULoss,
    diou_zero_weight_keeps_per_box_shape: DIoULoss,
    ciou_zero_weight_keeps_per_box_shape: CIoULoss,
}

#[test]
fn loss_config_survives_save_and_load() -> Result<()> {
    let path = std::env::temp_dir().join("detection_loss_smooth_l1_config.json");
    let config = SmoothL1LossConfig::new()
        .with_beta(0.5)
        .with_reduction(LossReduction::Sum)
        .with_loss_weight(2.0);

    config.save(&path)?;
    let loaded = SmoothL1LossConfig::load(&path).expect("Config should load");
    std::fs::remove_file(&path)?;

    assert_eq!(loaded.beta, 0.5);
    assert_eq!(loaded.reduction, LossReduction::Sum);
    assert_eq!(loaded.loss_weight, 2.0);
    Ok(())
}

macro_rules! regression_contract {
    ($($name:ident: $loss:ty,)*) => {$(
        #[test]
        fn $name() -> Result<()> {
            let pred = random([10, 4]);
            let target = random([10, 4]);
            let weight = random([10, 4]);
            let loss = <$loss>::new();

            let reduced = loss.forward(pred.clone(), target.clone(), None, None, None)?;
            assert_eq!(reduced.dims(), vec![1]);

            loss.forward(pred.clone(), target.clone(), Some(weight.into()), None, None)?;

            let none = loss.forward(
                pred.clone(),
                target.clone(),
                None,
                Some(LossReduction::None),
                None,
            )?;
            assert_eq!(none.dims()[0], 10);

            loss.forward(pred.clone(), target.clone(), None, Some(LossReduction::Mean), None)?;
            loss.forward(pred.clone(), target.clone(), None, None, Some(10.0))?;

            let err = loss
                .forward(
                    pred.clone(),
                    target.clone(),
                    None,
                    Some(LossReduction::Sum),
                    Some(10.0),
                )
                .unwrap_err();
            assert_eq!(err, LossError::AvgFactorWithSum);

            for reduction in [None, Some("none"), Some("mean")] {
                let reduction = LossReduction::parse_override(reduction)?;
                loss.forward(pred.clone(), target.clone(), None, reduction, Some(10.0))?;
            }
            Ok(())
        }
    )*};
}

regression_contract! {
    iou_regression_contract: IoULoss,
    bounded_iou_regression_contract: BoundedIoULoss,
    giou_regression_contract: GIoULoss,
    diou_regression_contract: DIoULoss,
    ciou_regression_contract: CIoULoss,
    mse_regression_contract: MseLoss,
    l1_regression_contract: L1Loss,
    smooth_l1_regression_contract: SmoothL1Loss,
    balanced_l1_regression_contract: BalancedL1Loss,
}

macro_rules! classification_contract {
    ($($name:ident: $loss:ty,)*) => {$(
        #[test]
        fn $name() -> Result<()> {
            let pred = random([10, 5]);
            let loss = <$loss>::new();

            loss.forward(pred.clone(), labels(), None, None, None)?;
            loss.forward(pred.clone(), labels(), None, Some(LossReduction::Mean), None)?;
            loss.forward(pred.clone(), labels(), None, None, Some(10.0))?;

            let err = loss
                .forward(pred.clone(), labels(), None, Some(LossReduction::Sum), Some(10.0))
                .unwrap_err();
            assert_eq!(err, LossError::AvgFactorWithSum);

            for reduction in [None, Some("none"), Some("mean")] {
                let reduction = LossReduction::parse_override(reduction)?;
                loss.forward(pred.clone(), labels(), None, reduction, Some(10.0))?;
            }
            Ok(())
        }
    )*};
}

classification_contract! {
    focal_classification_contract: FocalLoss,
    cross_entropy_classification_contract: CrossEntropyLoss,
    binary_cross_entropy_classification_contract: BinaryCrossEntropyLoss,
}

#[test]
fn ghmr_forward_with_weight() -> Result<()> {
    let loss = GhmR::new().forward(
        random([10, 4]),
        random([10, 4]),
        Some(random([10, 4]).into()),
        None,
    )?;
    assert!(loss.is_reduced());
    Ok(())
}

#[test]
fn ghmc_forward_with_weight() -> Result<()> {
    let weight = Tensor::<TestBackend, 1>::ones([10], &Default::default());
    let mut loss = GhmC::new();

    let reduced = loss.forward(random([10, 5]), labels(), Some(weight.into()), None)?;
    assert!(reduced.is_reduced());

    let none = loss.forward(random([10, 5]), labels(), None, Some(LossReduction::None))?;
    assert_eq!(none.dims(), vec![10, 5]);
    Ok(())
}

#[test]
fn quality_losses_follow_reduction_contract() -> Result<()> {
    let device = Default::default();
    let scores = Tensor::<TestBackend, 1>::random([10], Distribution::Default, &device);
    let qfl = QualityFocalLoss::new();

    let none = qfl.forward(
        random([10, 5]),
        (labels(), scores.clone()),
        None,
        Some(LossReduction::None),
        Some(10.0),
    )?;
    assert_eq!(none.dims(), vec![10]);
    let err = qfl
        .forward(
            random([10, 5]),
            (labels(), scores),
            None,
            Some(LossReduction::Sum),
            Some(10.0),
        )
        .unwrap_err();
    assert_eq!(err, LossError::AvgFactorWithSum);

    let positions = Tensor::<TestBackend, 1>::random([10], Distribution::Uniform(0.0, 7.0), &device);
    let dfl = DistributionFocalLoss::new().forward(random([10, 8]), positions, None, None, None)?;
    assert!(dfl.is_reduced());

    let vfl = VarifocalLoss::new().forward(random([10, 5]), random([10, 5]), None, None, Some(10.0))?;
    assert!(vfl.is_reduced());

    let gfl = GaussianFocalLoss::new().forward(
        random([10, 5]).clamp(0.01, 0.99),
        random([10, 5]),
        None,
        Some(LossReduction::Sum),
        None,
    )?;
    assert!(gfl.is_reduced());

    let kd = KnowledgeDistillationKlDivLoss::new().forward(
        random([10, 5]),
        random([10, 5]),
        None,
        Some(LossReduction::None),
        None,
    )?;
    assert_eq!(kd.dims(), vec![10]);
    Ok(())
}

#[test]
fn seesaw_splits_classes_and_objectness() -> Result<()> {
    let mut loss = SeesawLossConfig::new().with_num_classes(4).init();

    let output = loss.forward(random([10, 6]), labels(), None, None, None)?;

    // labels equal to 4 are background
    assert_eq!(loss.cum_samples(), &[2.0, 2.0, 2.0, 2.0, 2.0]);
    assert!(output.total().is_reduced());

    let err = loss
        .forward(random([10, 6]), labels(), None, Some(LossReduction::Sum), Some(10.0))
        .unwrap_err();
    assert_eq!(err, LossError::AvgFactorWithSum);
    Ok(())
}
