use ndarray::{Array2, ArrayView2};

/// Bilinear resize with half-pixel centres (the `align_corners = false` convention).
pub fn resize_bilinear(input: ArrayView2<f32>, height: usize, width: usize) -> Array2<f32> {
    let (src_h, src_w) = input.dim();
    if src_h == 0 || src_w == 0 {
        return Array2::zeros((height, width));
    }
    if src_h == height && src_w == width {
        return input.to_owned();
    }

    let scale_y = src_h as f32 / height as f32;
    let scale_x = src_w as f32 / width as f32;

    Array2::from_shape_fn((height, width), |(y, x)| {
        let sy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (src_h - 1) as f32);
        let sx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (src_w - 1) as f32);
        let y0 = sy.floor() as usize;
        let x0 = sx.floor() as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let x1 = (x0 + 1).min(src_w - 1);
        let fy = sy - y0 as f32;
        let fx = sx - x0 as f32;

        let top = input[[y0, x0]] * (1.0 - fx) + input[[y0, x1]] * fx;
        let bottom = input[[y1, x0]] * (1.0 - fx) + input[[y1, x1]] * fx;
        top * (1.0 - fy) + bottom * fy
    })
}
