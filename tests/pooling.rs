mod common;

use common::{assert_close, get, get_i32, host, put, zeros, zeros_i32};
use layer_kernels::DispatchError;
use layer_kernels::error::StatusCode;
use layer_kernels::ops::pooling::*;

fn ramp(n: usize) -> Vec<f32> {
    (0..n).map(|i| i as f32).collect()
}

#[test]
fn max_pool_records_winners_in_either_mask() {
    let ctx = host();
    // 4x4 input, 2x2 windows, stride 2
    let bottom = put(&ctx, &ramp(16));
    let top = zeros::<f32>(&ctx, 4);
    let mask = zeros_i32(&ctx, 4);
    max_pool_forward::<f32>(&ctx, 4, &bottom, 1, 1, 4, 4, 2, 2, 2, 2, 2, 2, 0, 0, &top, Some(&mask), None)
        .unwrap();
    assert_eq!(get::<f32>(&ctx, &top), [5.0, 7.0, 13.0, 15.0]);
    assert_eq!(get_i32(&ctx, &mask), [5, 7, 13, 15]);

    let top_mask = zeros::<f32>(&ctx, 4);
    max_pool_forward::<f32>(&ctx, 4, &bottom, 1, 1, 4, 4, 2, 2, 2, 2, 2, 2, 0, 0, &top, None, Some(&top_mask))
        .unwrap();
    assert_eq!(get::<f32>(&ctx, &top_mask), [5.0, 7.0, 13.0, 15.0]);

    let top_diff = put(&ctx, &[1.0f32, 2.0, 3.0, 4.0]);
    let bottom_diff = put(&ctx, &[9.0f32; 16]);
    max_pool_backward::<f32>(
        &ctx, 16, &top_diff, None, Some(&top_mask), 1, 1, 4, 4, 2, 2, 2, 2, 2, 2, 0, 0, &bottom_diff,
    )
    .unwrap();
    let mut expected = [0.0f32; 16];
    expected[5] = 1.0;
    expected[7] = 2.0;
    expected[13] = 3.0;
    expected[15] = 4.0;
    assert_eq!(get::<f32>(&ctx, &bottom_diff), expected);

    max_pool_backward::<f32>(
        &ctx, 16, &top_diff, Some(&mask), None, 1, 1, 4, 4, 2, 2, 2, 2, 2, 2, 0, 0, &bottom_diff,
    )
    .unwrap();
    assert_eq!(get::<f32>(&ctx, &bottom_diff), expected);
}

#[test]
fn overlapping_windows_accumulate_gradient() {
    let ctx = host();
    // 1x4 row, 1x3 windows, stride 1: both windows pick the 9
    let bottom = put(&ctx, &[0.0f32, 1.0, 9.0, 2.0]);
    let top = zeros::<f32>(&ctx, 2);
    let mask = zeros_i32(&ctx, 2);
    max_pool_forward::<f32>(&ctx, 2, &bottom, 1, 1, 1, 4, 1, 2, 1, 3, 1, 1, 0, 0, &top, Some(&mask), None)
        .unwrap();
    assert_eq!(get::<f32>(&ctx, &top), [9.0, 9.0]);
    assert_eq!(get_i32(&ctx, &mask), [2, 2]);

    let top_diff = put(&ctx, &[1.0f32, 1.0]);
    let bottom_diff = zeros::<f32>(&ctx, 4);
    max_pool_backward::<f32>(
        &ctx, 4, &top_diff, Some(&mask), None, 1, 1, 1, 4, 1, 2, 1, 3, 1, 1, 0, 0, &bottom_diff,
    )
    .unwrap();
    assert_eq!(get::<f32>(&ctx, &bottom_diff), [0.0, 0.0, 2.0, 0.0]);
}

#[test]
fn max_pool_needs_exactly_one_mask() {
    let ctx = host();
    let bottom = put(&ctx, &ramp(16));
    let top = zeros::<f32>(&ctx, 4);
    let mask = zeros_i32(&ctx, 4);
    let top_mask = zeros::<f32>(&ctx, 4);
    for (m, tm) in [(None, None), (Some(&mask), Some(&top_mask))] {
        let err = max_pool_forward::<f32>(&ctx, 4, &bottom, 1, 1, 4, 4, 2, 2, 2, 2, 2, 2, 0, 0, &top, m, tm)
            .unwrap_err();
        assert!(matches!(err, DispatchError::PreconditionViolation { .. }));
    }
}

#[test]
fn short_mask_fails_with_its_own_code() {
    let ctx = host();
    let top_diff = put(&ctx, &[1.0f32; 4]);
    let mask = zeros_i32(&ctx, 1);
    let bottom_diff = zeros::<f32>(&ctx, 16);
    let err = max_pool_backward::<f32>(
        &ctx, 16, &top_diff, Some(&mask), None, 1, 1, 4, 4, 2, 2, 2, 2, 2, 2, 0, 0, &bottom_diff,
    )
    .unwrap_err();
    assert_eq!(err.stage(), "enqueue");
    assert_eq!(err.code(), Some(StatusCode::OUT_OF_RESOURCES));
}

#[test]
fn average_pool_divides_by_full_window() {
    let ctx = host();
    let bottom = put(&ctx, &ramp(16));
    let top = zeros::<f32>(&ctx, 4);
    ave_pool_forward::<f32>(&ctx, 4, &bottom, 1, 1, 4, 4, 2, 2, 2, 2, 2, 2, 0, 0, &top).unwrap();
    assert_close(&get::<f32>(&ctx, &top), &[2.5, 4.5, 10.5, 12.5]);

    // 3x3 windows, stride 2, pad 1 over 4x4
    let pooled = pooled_extent(4, 3, 2, 1).unwrap();
    assert_eq!(pooled, 3);
    let top = zeros::<f64>(&ctx, pooled * pooled);
    let bottom = put(&ctx, &(0..16).map(f64::from).collect::<Vec<_>>());
    ave_pool_forward::<f64>(&ctx, 9, &bottom, 1, 1, 4, 4, 3, 3, 3, 3, 2, 2, 1, 1, &top).unwrap();
    // corner window covers 0, 1, 4, 5 but still divides by 9
    assert_close(&get::<f64>(&ctx, &top)[..1], &[10.0 / 9.0]);

    let top_diff = put(&ctx, &[1.0f32; 4]);
    let bottom_diff = zeros::<f32>(&ctx, 16);
    ave_pool_backward::<f32>(&ctx, 16, &top_diff, 1, 1, 4, 4, 2, 2, 2, 2, 2, 2, 0, 0, &bottom_diff)
        .unwrap();
    assert!(get::<f32>(&ctx, &bottom_diff).iter().all(|&d| d == 0.25));
}

#[test]
fn stochastic_pool_samples_and_routes_back() {
    let ctx = host();
    // one 2x2 window over a 2x2 input
    let bottom = put(&ctx, &[1.0f32, 2.0, 3.0, 4.0]);
    let top = zeros::<f32>(&ctx, 1);

    sto_pool_forward_test::<f32>(&ctx, 1, &bottom, 1, 1, 2, 2, 1, 1, 2, 2, 2, 2, &top).unwrap();
    assert_close(&get::<f32>(&ctx, &top), &[3.0]);

    // running sums 1, 3, 6 first reach 0.5 * 10 at cell 2
    let rand_idx = put(&ctx, &[0.5f32]);
    sto_pool_forward_train::<f32>(&ctx, 1, &bottom, 1, 1, 2, 2, 1, 1, 2, 2, 2, 2, &rand_idx, &top)
        .unwrap();
    assert_eq!(get::<f32>(&ctx, &rand_idx), [2.0]);
    assert_eq!(get::<f32>(&ctx, &top), [3.0]);

    let top_diff = put(&ctx, &[7.0f32]);
    let bottom_diff = zeros::<f32>(&ctx, 4);
    sto_pool_backward::<f32>(&ctx, 4, &rand_idx, &top_diff, 1, 1, 2, 2, 1, 1, 2, 2, 2, 2, &bottom_diff)
        .unwrap();
    assert_eq!(get::<f32>(&ctx, &bottom_diff), [0.0, 0.0, 7.0, 0.0]);
}

#[test]
fn square_kernel_helpers() {
    let ctx = host();
    let bottom = put(&ctx, &(0..16).map(f64::from).collect::<Vec<_>>());
    let top = zeros::<f64>(&ctx, 4);

    let max_fp = ctx.kernel::<f64>("max_pool_fp").unwrap();
    max_pool_fp(&ctx, &max_fp, 4, &bottom, 1, 1, 4, 4, 2, 2, 2, 2, &top).unwrap();
    assert_eq!(get::<f64>(&ctx, &top), [5.0, 7.0, 13.0, 15.0]);

    let max_bp = ctx.kernel::<f64>("max_pool_bp").unwrap();
    let top_diff = put(&ctx, &[1.0f64; 4]);
    let bottom_diff = zeros::<f64>(&ctx, 16);
    max_pool_bp(&ctx, &max_bp, 16, &bottom, &top, &top_diff, 1, 1, 4, 4, 2, 2, 2, 2, &bottom_diff)
        .unwrap();
    let grad = get::<f64>(&ctx, &bottom_diff);
    let hit: Vec<usize> = (0..16).filter(|&i| grad[i] == 1.0).collect();
    assert_eq!(hit, [5, 7, 13, 15]);

    let ave_fp = ctx.kernel::<f64>("ave_pool_fp").unwrap();
    ave_pool_fp(&ctx, &ave_fp, 4, &bottom, 1, 1, 4, 4, 2, 2, 2, 2, 0, &top).unwrap();
    assert_close(&get::<f64>(&ctx, &top), &[2.5, 4.5, 10.5, 12.5]);

    let ave_bp = ctx.kernel::<f64>("ave_pool_bp").unwrap();
    ave_pool_bp(&ctx, &ave_bp, 16, &top_diff, 1, 1, 4, 4, 2, 2, 2, 2, 0, &bottom_diff).unwrap();
    assert!(get::<f64>(&ctx, &bottom_diff).iter().all(|&d| d == 0.25));
}

#[test]
fn channels_pool_independently() {
    let ctx = host();
    // num 2, channels 3, 2x2 planes, one 2x2 window each
    let data: Vec<f32> = (0..24).map(|i| (i % 4) as f32 + (i / 4) as f32 * 10.0).collect();
    let bottom = put(&ctx, &data);
    let top = zeros::<f32>(&ctx, 6);
    let mask = zeros_i32(&ctx, 6);
    max_pool_forward::<f32>(&ctx, 6, &bottom, 2, 3, 2, 2, 1, 1, 2, 2, 1, 1, 0, 0, &top, Some(&mask), None)
        .unwrap();
    assert_eq!(get::<f32>(&ctx, &top), [3.0, 13.0, 23.0, 33.0, 43.0, 53.0]);
    assert_eq!(get_i32(&ctx, &mask), [3; 6]);
}
