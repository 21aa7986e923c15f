mod common;

use common::{assert_close, get, host, put, zeros};
use layer_kernels::Dispatcher;
use layer_kernels::device::DeviceBuffer;
use layer_kernels::ops::softmax::*;

fn reference_softmax(rows: &[[f64; 3]]) -> Vec<f64> {
    rows.iter()
        .flat_map(|row| {
            let max = row.iter().copied().fold(f64::MIN, f64::max);
            let sum: f64 = row.iter().map(|x| (x - max).exp()).sum();
            row.iter().map(move |x| (x - max).exp() / sum)
        })
        .collect()
}

/// Runs the five-launch softmax over `[num][channels][1]` in place.
fn softmax_in_place(ctx: &Dispatcher, num: usize, channels: usize, data: &DeviceBuffer) {
    let count = num * channels;
    let scale = zeros::<f64>(ctx, num);
    channel_max::<f64>(ctx, num, channels, 1, data, &scale).unwrap();
    channel_subtract::<f64>(ctx, count, num, channels, 1, &scale, data).unwrap();
    exp::<f64>(ctx, count, data, data).unwrap();
    channel_sum::<f64>(ctx, num, channels, 1, data, &scale).unwrap();
    channel_div::<f64>(ctx, count, num, channels, 1, &scale, data).unwrap();
}

#[test]
fn softmax_pipeline_matches_reference() {
    let ctx = host();
    let rows = [[1.0, 2.0, 3.0], [1.0, 1.0, 1.0]];
    let data = put(&ctx, &rows.concat());
    softmax_in_place(&ctx, 2, 3, &data);
    let prob = get::<f64>(&ctx, &data);
    assert_close(&prob, &reference_softmax(&rows));

    let dot = zeros::<f64>(&ctx, 2);
    channel_dot::<f64>(&ctx, 2, 3, 1, &data, &data, &dot).unwrap();
    let expected: Vec<f64> = prob.chunks(3).map(|r| r.iter().map(|p| p * p).sum()).collect();
    assert_close(&get::<f64>(&ctx, &dot), &expected);
}

#[test]
fn reductions_run_per_spatial_position() {
    let ctx = host();
    // num 1, channels 2, spatial 2
    let data = put(&ctx, &[1.0f32, 5.0, 3.0, 2.0]);
    let out = zeros::<f32>(&ctx, 2);
    channel_max::<f32>(&ctx, 1, 2, 2, &data, &out).unwrap();
    assert_eq!(get::<f32>(&ctx, &out), [3.0, 5.0]);
    channel_sum::<f32>(&ctx, 1, 2, 2, &data, &out).unwrap();
    assert_eq!(get::<f32>(&ctx, &out), [4.0, 7.0]);
}

#[test]
fn loss_counts_and_ignores_labels() {
    let ctx = host();
    let prob = [0.2f32, 0.3, 0.5, 0.6, 0.4, 0.0];
    let prob_buf = put(&ctx, &prob);
    let label = put(&ctx, &[2.0f32, 2.0]);
    let loss = zeros::<f32>(&ctx, 2);
    let counts = zeros::<f32>(&ctx, 2);

    softmax_loss_forward::<f32>(&ctx, 2, &prob_buf, &label, &loss, 2, 3, 1, false, 0, &counts).unwrap();
    let values = get::<f32>(&ctx, &loss);
    assert_close(&values[..1], &[-(0.5f32).ln()]);
    // probability 0 is floored at FLT_MIN
    assert_close(&values[1..], &[-(f32::MIN_POSITIVE).ln()]);
    assert_eq!(get::<f32>(&ctx, &counts), [1.0, 1.0]);

    let label = put(&ctx, &[2.0f32, -1.0]);
    softmax_loss_forward::<f32>(&ctx, 2, &prob_buf, &label, &loss, 2, 3, 1, true, -1, &counts)
        .unwrap();
    assert_eq!(get::<f32>(&ctx, &loss)[1], 0.0);
    assert_eq!(get::<f32>(&ctx, &counts), [1.0, 0.0]);

    let diff = put(&ctx, &prob);
    softmax_loss_backward::<f32>(&ctx, 2, &prob_buf, &label, &diff, 2, 3, 1, true, -1, &counts)
        .unwrap();
    assert_close(&get::<f32>(&ctx, &diff), &[0.2, 0.3, -0.5, 0.0, 0.0, 0.0]);
}

#[test]
fn out_of_range_label_fails() {
    let ctx = host();
    let prob = put(&ctx, &[0.5f32, 0.5]);
    let label = put(&ctx, &[7.0f32]);
    let loss = zeros::<f32>(&ctx, 1);
    let counts = zeros::<f32>(&ctx, 1);
    let err =
        softmax_loss_forward::<f32>(&ctx, 1, &prob, &label, &loss, 1, 2, 1, false, 0, &counts)
            .unwrap_err();
    assert_eq!(err.stage(), "enqueue");
}

#[test]
fn row_helpers_compute_softmax_and_mean_loss() {
    let ctx = host();
    let rows = [[0.5, 1.5, -1.0], [2.0, 0.0, 2.0]];
    let data = put(&ctx, &rows.concat());
    let scale = zeros::<f64>(&ctx, 2);

    let get_max_k = ctx.kernel::<f64>("get_max").unwrap();
    let exp_k = ctx.kernel::<f64>("exp").unwrap();
    let div_k = ctx.kernel::<f64>("softmax_div").unwrap();
    let subtract = ctx.kernel::<f64>("kernel_channel_subtract").unwrap();

    get_max(&ctx, &get_max_k, 2, 3, &data, &scale).unwrap();
    assert_eq!(get::<f64>(&ctx, &scale), [1.5, 2.0]);
    ctx.bind(&subtract)
        .size(6)
        .size(2)
        .size(3)
        .size(1)
        .buffer(&scale)
        .buffer(&data)
        .finish()
        .unwrap()
        .enqueue(&ctx.linear(6))
        .unwrap();
    exp_rows(&ctx, &exp_k, 6, &data, &data).unwrap();
    let sums = get::<f64>(&ctx, &data)
        .chunks(3)
        .map(|r| r.iter().sum::<f64>())
        .collect::<Vec<_>>();
    let sums = put(&ctx, &sums);
    softmax_div(&ctx, &div_k, 2, 3, &sums, &data).unwrap();
    let prob = get::<f64>(&ctx, &data);
    assert_close(&prob, &reference_softmax(&rows));

    let label = put(&ctx, &[1.0f64, 0.0]);
    let loss = zeros::<f64>(&ctx, 1);
    let loss_k = ctx.kernel::<f64>("softmax").unwrap();
    let mean: f64 = softmax_loss(&ctx, &loss_k, 2, 3, &data, &label, &loss).unwrap();
    let expected = -(prob[1].ln() + prob[3].ln()) / 2.0;
    assert_close(&[mean], &[expected]);

    let diff_k = ctx.kernel::<f64>("diff").unwrap();
    let scal_k = ctx.kernel::<f64>("scal").unwrap();
    diff(&ctx, &diff_k, 2, 3, &data, &label).unwrap();
    scal(&ctx, &scal_k, 6, 0.5f64, &data).unwrap();
    let grad = get::<f64>(&ctx, &data);
    assert_close(&[grad[1], grad[3]], &[(prob[1] - 1.0) / 2.0, (prob[3] - 1.0) / 2.0]);
    assert_close(&[grad[0]], &[prob[0] / 2.0]);
}
