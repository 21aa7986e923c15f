mod common;

use common::{assert_close, get, host, put, zeros};
use layer_kernels::work::ConvTiling;
use layer_kernels::{Dispatcher, HostDevice};
use layer_kernels::config::DispatchConfig;
use layer_kernels::ops::conv::{conv_direct, output_extent};
use layer_kernels::ops::transform::{PackingPlan, opttrans, transform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Seeded values in `[-1, 1)`.
fn noise(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.random_range(-1.0..1.0)).collect()
}

/// Shape of one test convolution, dense NCHW.
#[derive(Clone, Copy)]
struct Shape {
    batch: usize,
    channel_in: usize,
    height: usize,
    width: usize,
    channel_out: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride: usize,
    pad: usize,
    height_out: usize,
    width_out: usize,
}

impl Shape {
    fn new(
        batch: usize,
        channel_in: usize,
        (height, width): (usize, usize),
        channel_out: usize,
        (kernel_h, kernel_w): (usize, usize),
        stride: usize,
        pad: usize,
    ) -> Self {
        Self {
            batch,
            channel_in,
            height,
            width,
            channel_out,
            kernel_h,
            kernel_w,
            stride,
            pad,
            height_out: output_extent(height, kernel_h, stride, pad).unwrap(),
            width_out: output_extent(width, kernel_w, stride, pad).unwrap(),
        }
    }

    fn bottom_count(&self) -> usize {
        self.batch * self.channel_in * self.height * self.width
    }

    fn top_count(&self) -> usize {
        self.batch * self.channel_out * self.height_out * self.width_out
    }

    fn weights_count(&self) -> usize {
        self.channel_out * self.channel_in * self.kernel_h * self.kernel_w
    }
}

fn naive_conv(g: &Shape, input: &[f64], weights: &[f64], bias: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; g.top_count()];
    for b in 0..g.batch {
        for oc in 0..g.channel_out {
            for oy in 0..g.height_out {
                for ox in 0..g.width_out {
                    let mut sum = bias[oc];
                    for ic in 0..g.channel_in {
                        for kh in 0..g.kernel_h {
                            for kw in 0..g.kernel_w {
                                let y = (oy * g.stride + kh) as isize - g.pad as isize;
                                let x = (ox * g.stride + kw) as isize - g.pad as isize;
                                if y < 0 || x < 0 || y >= g.height as isize || x >= g.width as isize {
                                    continue;
                                }
                                let pixel = ((b * g.channel_in + ic) * g.height + y as usize)
                                    * g.width
                                    + x as usize;
                                let tap = ((oc * g.channel_in + ic) * g.kernel_h + kh) * g.kernel_w + kw;
                                sum += input[pixel] * weights[tap];
                            }
                        }
                    }
                    out[((b * g.channel_out + oc) * g.height_out + oy) * g.width_out + ox] = sum;
                }
            }
        }
    }
    out
}

fn check(ctx: &Dispatcher, g: Shape) -> ConvTiling {
    let input = noise(g.bottom_count(), 1);
    let weights = noise(g.weights_count(), 2);
    let bias = noise(g.channel_out, 3);
    let top = zeros::<f64>(ctx, g.top_count());
    let tiling = conv_direct::<f64>(
        ctx,
        &put(ctx, &input),
        &put(ctx, &weights),
        &put(ctx, &bias),
        &top,
        g.channel_in,
        g.width,
        g.height,
        g.channel_out,
        g.width_out,
        g.height_out,
        g.kernel_w,
        g.kernel_h,
        g.stride,
        g.pad,
        g.batch,
    )
    .unwrap();
    assert_close(&get::<f64>(ctx, &top), &naive_conv(&g, &input, &weights, &bias));
    tiling
}

#[test]
fn small_output_packs_four_channels() {
    let ctx = host();
    let g = Shape::new(2, 3, (7, 9), 4, (3, 3), 2, 1);
    let tiling = check(&ctx, g);
    assert_eq!((tiling.pix_horiz, tiling.pix_vert, tiling.outs_per_item), (1, 1, 4));
    assert_eq!(tiling.work_size().global(), &[8, 8, 2]);
}

#[test]
fn wide_output_with_odd_channels() {
    let ctx = host();
    let g = Shape::new(1, 2, (40, 40), 3, (3, 3), 1, 1);
    let tiling = check(&ctx, g);
    assert_eq!((tiling.pix_horiz, tiling.pix_vert, tiling.outs_per_item), (4, 2, 1));
    assert_eq!(tiling.work_size().global(), &[16, 24, 3]);
}

#[test]
fn rectangular_kernel_pairs_channels() {
    let ctx = host();
    let g = Shape::new(3, 1, (20, 22), 2, (5, 3), 1, 0);
    assert_eq!((g.height_out, g.width_out), (16, 20));
    let tiling = check(&ctx, g);
    assert_eq!((tiling.pix_horiz, tiling.outs_per_item), (2, 2));
}

#[test]
fn tile_edge_comes_from_config() {
    common::init();
    let config = DispatchConfig {
        conv_tile: 4,
        ..DispatchConfig::default()
    };
    let ctx = Dispatcher::with_config(Arc::new(HostDevice::new()), config).unwrap();
    let g = Shape::new(1, 2, (12, 12), 2, (3, 3), 1, 1);
    let tiling = check(&ctx, g);
    assert_eq!((tiling.tile, tiling.pix_horiz, tiling.pix_vert), (4, 2, 2));
    assert_eq!(tiling.work_size().local(), &[4, 4, 1]);
}

#[test]
fn opttrans_interleaves_images_by_channel() {
    let ctx = host();
    // two images, two channels, 1x2 pixels
    let im = put(&ctx, &[0.0f32, 1.0, 2.0, 3.0, 10.0, 11.0, 12.0, 13.0]);
    let opt = put(&ctx, &[-1.0f32; 10]);
    opttrans::<f32>(&ctx, &im, 0, 2, 1, 2, &opt, 1, 2).unwrap();
    assert_eq!(
        get::<f32>(&ctx, &opt),
        [-1.0, 0.0, 1.0, 10.0, 11.0, 2.0, 3.0, 12.0, 13.0, -1.0]
    );

    // second image only
    let one = zeros::<f32>(&ctx, 4);
    opttrans::<f32>(&ctx, &im, 4, 2, 1, 2, &one, 0, 1).unwrap();
    assert_eq!(get::<f32>(&ctx, &one), [10.0, 11.0, 12.0, 13.0]);
}

#[test]
fn transform_unpacks_each_image() {
    let ctx = host();
    let (rows, cols, packing, offset) = (2, 3, 2, 4);
    let src: Vec<f64> = (0..rows * cols * packing).map(|i| i as f64).collect();
    let dst = put(&ctx, &vec![-1.0f64; offset + rows * cols * packing]);
    transform::<f64>(&ctx, &put(&ctx, &src), &dst, offset, rows, cols, packing).unwrap();

    let out = get::<f64>(&ctx, &dst);
    assert!(out[..offset].iter().all(|&v| v == -1.0));
    for p in 0..packing {
        for n in 0..rows {
            for m in 0..cols {
                assert_eq!(
                    out[offset + p * rows * cols + n * cols + m],
                    src[(n * packing + p) * cols + m]
                );
            }
        }
    }
}

#[test]
fn packing_plan_uses_configured_pack_size() {
    let ctx = host();
    let plan = PackingPlan::for_batch(&ctx, 37).unwrap();
    assert_eq!(plan.packs(), 3);
    assert_eq!(plan.last(), Some((32, 5)));
}
