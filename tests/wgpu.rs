#![cfg(feature = "wgpu")]

mod common;

use common::{assert_close, get, put, put_i32, zeros};
use layer_kernels::backend::Backend;
use layer_kernels::ops::{activation, dropout, elementwise};
use layer_kernels::{DispatchError, Dispatcher};

/// `None` on machines without an adapter.
fn gpu() -> Option<Dispatcher> {
    common::init();
    match Backend::Wgpu.open() {
        Ok(device) => Some(Dispatcher::new(device)),
        Err(err) => {
            log::warn!("skipping: {err}");
            None
        }
    }
}

#[test]
fn elementwise_and_relu_match_host() {
    let Some(ctx) = gpu() else { return };
    let a = put(&ctx, &[1.0f32, -2.0, 3.0, 0.0]);
    let b = put(&ctx, &[0.5f32, 0.5, 0.5, 0.5]);
    let y = zeros::<f32>(&ctx, 4);
    elementwise::add::<f32>(&ctx, 4, &a, &b, &y).unwrap();
    assert_close(&get::<f32>(&ctx, &y), &[1.5, -1.5, 3.5, 0.5]);

    activation::relu_forward(&ctx, 4, &a, &y, 0.1f32).unwrap();
    assert_close(&get::<f32>(&ctx, &y), &[1.0, -0.2, 3.0, 0.0]);

    // in place
    elementwise::mul::<f32>(&ctx, 4, &a, &a, &a).unwrap();
    assert_close(&get::<f32>(&ctx, &a), &[1.0, 4.0, 9.0, 0.0]);
}

#[test]
fn dropout_reads_integer_masks() {
    let Some(ctx) = gpu() else { return };
    let x = put(&ctx, &[1.0f32, 2.0, 3.0, 4.0]);
    let mask = put_i32(&ctx, &[0, 1, 1, 0]);
    let y = zeros::<f32>(&ctx, 4);
    dropout::dropout_forward(&ctx, 4, &x, &mask, 2.0f32, &y).unwrap();
    assert_close(&get::<f32>(&ctx, &y), &[0.0, 4.0, 6.0, 0.0]);
}

#[test]
fn double_precision_is_not_shipped() {
    let Some(ctx) = gpu() else { return };
    assert!(matches!(
        ctx.kernel::<f64>("ReLUForward"),
        Err(DispatchError::KernelNotFound { .. })
    ));
    assert!(ctx.kernel::<f32>("MaxPoolForward").is_err());
}
