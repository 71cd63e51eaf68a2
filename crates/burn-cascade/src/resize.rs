//! Antialiased resizing of image batches
//!
//! Resampling is separable: a `[out, in]` weight matrix is built on the host
//! for each axis and applied with matmuls on the tensor's device, broadcast
//! across every (batch, channel) plane.
//! Weights follow the triangle (bilinear) filter with half-pixel centers; when
//! downscaling, the filter support is widened by the scale factor so every
//! source pixel contributes, which is what makes the resize antialiased.

use burn::prelude::*;

/// Whether `images` must be resized to reach `target x target`
pub fn needs_resize<B: Backend>(images: &Tensor<B, 4>, target: usize) -> bool {
    let [_, _, h, w] = images.dims();
    h != target || w != target
}

/// Resizes an image batch to `target x target`
///
/// Batch and channel counts are preserved. A batch already at the target
/// size is returned as-is without touching its data.
pub fn resize_to<B: Backend>(images: Tensor<B, 4>, target: usize) -> Tensor<B, 4> {
    if !needs_resize(&images, target) {
        return images;
    }

    let [b, c, h, w] = images.dims();
    let device = images.device();
    let n = b * c;

    let rows: Tensor<B, 2> = Tensor::from_data(
        TensorData::new(resize_weights(h, target), [target, h]),
        &device,
    );
    let cols: Tensor<B, 2> = Tensor::from_data(
        TensorData::new(resize_weights(w, target), [target, w]),
        &device,
    );
    // Leading dim of 1 broadcasts against the N planes
    let rows = rows.unsqueeze::<3>(); // [1, T, H]
    let cols_t = cols.transpose().unsqueeze::<3>(); // [1, W, T]

    let planes = images.reshape([n, h, w]);
    let resized = rows.matmul(planes.matmul(cols_t)); // [N, T, T]
    resized.reshape([b, c, target, target])
}

fn triangle(x: f64) -> f64 {
    (1.0 - x.abs()).max(0.0)
}

/// Row-major `[out_size, in_size]` resampling matrix; each row sums to 1
pub fn resize_weights(in_size: usize, out_size: usize) -> Vec<f32> {
    let mut weights = vec![0.0f32; out_size * in_size];
    if in_size == 0 || out_size == 0 {
        return weights;
    }

    let scale = in_size as f64 / out_size as f64;
    let filter_scale = scale.max(1.0);
    let support = filter_scale;

    for i in 0..out_size {
        let center = (i as f64 + 0.5) * scale;
        let start = (center - support + 0.5).floor().max(0.0) as usize;
        let end = ((center + support + 0.5).floor() as usize).min(in_size);

        let row = &mut weights[i * in_size..(i + 1) * in_size];
        let mut total = 0.0f64;
        for (j, slot) in row.iter_mut().enumerate().take(end).skip(start) {
            let w = triangle((j as f64 - center + 0.5) / filter_scale);
            *slot = w as f32;
            total += w;
        }

        if total > 0.0 {
            for slot in &mut row[start..end] {
                *slot = (*slot as f64 / total) as f32;
            }
        } else {
            // Degenerate window: fall back to nearest neighbour
            let nearest = (center.floor() as usize).min(in_size - 1);
            row[nearest] = 1.0;
        }
    }

    weights
}
