use image::{ImageBuffer, Luma};

/// A single channel 16 bit image, used for heightmaps.
pub type R16Image = ImageBuffer<Luma<u16>, Vec<u16>>;

#[inline]
pub(crate) fn squared(value: f32) -> f32 {
    value * value
}

/// Logarithm of `value` to an arbitrary `base`.
#[inline]
pub(crate) fn log_base(base: f32, value: f32) -> f32 {
    value.ln() / base.ln()
}

#[inline]
pub(crate) fn inverse_mix(a: f32, b: f32, value: f32) -> f32 {
    f32::clamp((value - a) / (b - a), 0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_mix_is_clamped() {
        assert_eq!(inverse_mix(2.0, 4.0, 3.0), 0.5);
        assert_eq!(inverse_mix(2.0, 4.0, 10.0), 1.0);
        assert_eq!(inverse_mix(2.0, 4.0, -1.0), 0.0);
    }
}
