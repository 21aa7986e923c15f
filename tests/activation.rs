mod common;

use common::{assert_close, get, host, put, put_i32, zeros};
use layer_kernels::ops::activation::{
    prelu_backward, prelu_forward, prelu_param_backward, relu_backward, relu_forward,
};
use layer_kernels::ops::dropout::{dropout_backward, dropout_forward};

#[test]
fn leaky_relu_treats_zero_as_non_positive() {
    let ctx = host();
    let x = put(&ctx, &[-2.0f32, 0.0, 3.0]);
    let y = zeros::<f32>(&ctx, 3);
    relu_forward(&ctx, 3, &x, &y, 0.1f32).unwrap();
    assert_close(&get::<f32>(&ctx, &y), &[-0.2, 0.0, 3.0]);

    let dy = put(&ctx, &[1.0f32, 1.0, 1.0]);
    let dx = zeros::<f32>(&ctx, 3);
    relu_backward(&ctx, 3, &dy, &x, &dx, 0.1f32).unwrap();
    assert_close(&get::<f32>(&ctx, &dx), &[0.1, 0.1, 1.0]);
}

#[test]
fn plain_relu_in_double() {
    let ctx = host();
    let x = put(&ctx, &[-1.5f64, 2.5]);
    let y = zeros::<f64>(&ctx, 2);
    relu_forward(&ctx, 2, &x, &y, 0.0f64).unwrap();
    assert_eq!(get::<f64>(&ctx, &y), [0.0, 2.5]);
}

#[test]
fn prelu_slopes_follow_channels() {
    let ctx = host();
    // num 1, channels 2, dim 2
    let x = put(&ctx, &[-1.0f32, 2.0, -3.0, -4.0]);
    let slope = put(&ctx, &[0.5f32, 0.25]);
    let y = zeros::<f32>(&ctx, 4);
    prelu_forward::<f32>(&ctx, 4, 2, 2, &x, &y, &slope, 1).unwrap();
    assert_close(&get::<f32>(&ctx, &y), &[-0.5, 2.0, -0.75, -1.0]);

    // div_factor = channels shares the first slope
    prelu_forward::<f32>(&ctx, 4, 2, 2, &x, &y, &slope, 2).unwrap();
    assert_close(&get::<f32>(&ctx, &y), &[-0.5, 2.0, -1.5, -2.0]);

    let dy = put(&ctx, &[1.0f32, 1.0, 2.0, 2.0]);
    let dx = zeros::<f32>(&ctx, 4);
    prelu_backward::<f32>(&ctx, 4, 2, 2, &dy, &x, &dx, &slope, 1).unwrap();
    assert_close(&get::<f32>(&ctx, &dx), &[0.5, 1.0, 0.5, 0.5]);

    let grad = zeros::<f32>(&ctx, 4);
    prelu_param_backward::<f32>(&ctx, 4, &dy, &x, &grad).unwrap();
    assert_close(&get::<f32>(&ctx, &grad), &[-1.0, 0.0, -6.0, -8.0]);
}

#[test]
fn prelu_rejects_zero_geometry() {
    let ctx = host();
    let x = put(&ctx, &[1.0f32; 4]);
    let slope = put(&ctx, &[0.5f32]);
    let y = zeros::<f32>(&ctx, 4);
    assert!(prelu_forward::<f32>(&ctx, 4, 2, 2, &x, &y, &slope, 0).is_err());
}

#[test]
fn dropout_scales_kept_units() {
    let ctx = host();
    let x = put(&ctx, &[1.0f32, 2.0, 3.0, 4.0]);
    let mask = put_i32(&ctx, &[1, 0, 1, 0]);
    let y = zeros::<f32>(&ctx, 4);
    dropout_forward(&ctx, 4, &x, &mask, 2.0f32, &y).unwrap();
    assert_eq!(get::<f32>(&ctx, &y), [2.0, 0.0, 6.0, 0.0]);

    let dy = put(&ctx, &[1.0f32; 4]);
    let dx = zeros::<f32>(&ctx, 4);
    dropout_backward(&ctx, 4, &dy, &mask, 0.5, 2.0f32, &dx).unwrap();
    assert_eq!(get::<f32>(&ctx, &dx), [2.0, 0.0, 2.0, 0.0]);
}

#[test]
fn dropout_with_unit_scale_and_full_mask_is_identity() {
    let ctx = host();
    let data = [0.25f64, -1.0, 8.0, 3.5];
    let x = put(&ctx, &data);
    let mask = put_i32(&ctx, &[1; 4]);
    let y = zeros::<f64>(&ctx, 4);
    dropout_forward(&ctx, 4, &x, &mask, 1.0f64, &y).unwrap();
    let dx = zeros::<f64>(&ctx, 4);
    dropout_backward(&ctx, 4, &y, &mask, 0.0, 1.0f64, &dx).unwrap();
    assert_eq!(get::<f64>(&ctx, &dx), data);
}
