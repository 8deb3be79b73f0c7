//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sparsedet::model::ProposalConfig;
use sparsedet::{
    export_state, load_state, ArchConfig, ConvItem, Detector, DetectorConfig, Tensor3,
};

/// A detector small enough to run in a unit test.
pub fn small_arch() -> ArchConfig {
    ArchConfig {
        in_channels: 3,
        features: vec![
            ConvItem::Conv(4),
            ConvItem::MaxPool,
            ConvItem::Conv(4),
            ConvItem::MaxPool,
        ],
        mask_conv: true,
        mask_linear: true,
        sparse_dense: false,
        hidden: vec![16, 16],
        pool_size: 2,
        n_class: 3,
        proposals: ProposalConfig {
            anchor_scales: vec![1.0, 2.0],
            anchor_ratios: vec![0.5, 1.0, 2.0],
            eval_post_nms: 20,
            min_size: 2.0,
            ..ProposalConfig::default()
        },
    }
}

/// Values on a 1/64 grid so they survive a JSON round trip exactly.
pub fn grid_value(rng: &mut StdRng) -> f32 {
    rng.random_range(-64i32..=64) as f32 / 64.0
}

/// Builds `arch` and fills every weight and bias with seeded values.
pub fn seeded_detector(arch: &ArchConfig, config: DetectorConfig, seed: u64) -> Detector {
    let mut detector = arch.build(config).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut state = export_state(&detector);
    for (key, record) in state.iter_mut() {
        if key.ends_with(".mask") {
            continue;
        }
        for value in record.data.iter_mut() {
            *value = grid_value(&mut rng);
        }
    }
    load_state(&mut detector, &state).unwrap();
    detector
}

pub fn seeded_image(seed: u64, height: usize, width: usize) -> Tensor3 {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..3 * height * width)
        .map(|_| rng.random_range(0.0f32..1.0))
        .collect();
    Tensor3::from_vec(data, 3, height, width).unwrap()
}
