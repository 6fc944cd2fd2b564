//! Screen-space-error based level of detail selection.
//!
//! Every section estimates how large its bounding sphere appears on screen
//! (`screen size`, the squared projected screen radius) and maps that value onto a ladder of
//! thresholds. The first step of the ladder (LOD 0 to LOD 1) is configured separately
//! (`lod0_distribution`), all further steps share one geometric distribution factor,
//! which yields a logarithmically spaced ladder matching the falloff of the projected
//! size with distance.

use crate::util::{inverse_mix, log_base, squared};
use bevy::{prelude::*, render::primitives::Aabb};

/// The smallest allowed ratio between the screen sizes of two successive lods.
pub const MIN_LOD_DISTRIBUTION: f32 = 1.01;

/// Precomputed screen size thresholds of the lod ladder.
///
/// All sizes are stored squared, so that they can be compared against
/// [`compute_bounds_screen_radius_squared`] directly.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LodSettings {
    /// The coarsest lod index.
    pub last_lod_index: u32,
    pub lod0_screen_size_squared: f32,
    pub lod1_screen_size_squared: f32,
    /// The squared ratio between the screen sizes of two successive lods (LOD >= 1).
    pub distribution_squared: f32,
    pub last_lod_screen_size_squared: f32,
}

impl LodSettings {
    /// Builds the threshold ladder for `lod_count` levels.
    ///
    /// Both distribution scalars are clamped to at least [`MIN_LOD_DISTRIBUTION`],
    /// so that the ladder is strictly decreasing.
    pub fn new(
        lod_count: u32,
        lod0_screen_size: f32,
        lod0_distribution: f32,
        lod_distribution: f32,
    ) -> Self {
        let lod_count = lod_count.max(2);

        let mut screen_size = lod0_screen_size;
        let mut divider = lod0_distribution.max(MIN_LOD_DISTRIBUTION);

        let lod0_screen_size_squared = squared(screen_size);
        screen_size /= divider;
        let lod1_screen_size_squared = squared(screen_size);

        divider = lod_distribution.max(MIN_LOD_DISTRIBUTION);

        // walk down to the coarsest lod, starting at lod 1
        for _ in 1..lod_count - 1 {
            screen_size /= divider;
        }

        Self {
            last_lod_index: lod_count - 1,
            lod0_screen_size_squared,
            lod1_screen_size_squared,
            distribution_squared: squared(divider),
            last_lod_screen_size_squared: squared(screen_size),
        }
    }

    /// The squared screen size at which `lod` starts.
    pub fn threshold(&self, lod: u32) -> f32 {
        match lod {
            0 => self.lod0_screen_size_squared,
            lod => {
                let lod = lod.min(self.last_lod_index);
                self.lod1_screen_size_squared / self.distribution_squared.powi(lod as i32 - 1)
            }
        }
    }
}

/// Selects the lod for the squared screen size.
///
/// Returns the integer lod index and the continuous fractional lod, which is used to
/// morph vertices towards the neighbouring lods.
/// Results are always within `[0, last_lod_index]`, invalid inputs (NaN) select the
/// coarsest lod.
pub fn lod_from_screen_size(
    settings: &LodSettings,
    screen_size_squared: f32,
    view_lod_scale: f32,
) -> (u32, f32) {
    let screen_size_squared = screen_size_squared / view_lod_scale;
    let last_lod = settings.last_lod_index;

    if screen_size_squared <= settings.last_lod_screen_size_squared {
        (last_lod, last_lod as f32)
    } else if screen_size_squared > settings.lod1_screen_size_squared {
        let fraction = inverse_mix(
            settings.lod0_screen_size_squared,
            settings.lod1_screen_size_squared,
            screen_size_squared,
        );

        (0, fraction)
    } else {
        let fraction = 1.0
            + log_base(
                settings.distribution_squared,
                settings.lod1_screen_size_squared / screen_size_squared,
            );

        if !fraction.is_finite() {
            return (last_lod, last_lod as f32);
        }

        let fraction = fraction.min(last_lod as f32);

        (fraction as u32, fraction)
    }
}

/// The radius of the bounding sphere used for screen size estimation.
///
/// This is the largest half extent rather than the diagonal, which keeps the estimate
/// stable for flat sections.
#[inline]
pub fn bounds_radius(aabb: &Aabb) -> f32 {
    aabb.half_extents.abs().max_element()
}

/// Estimates the squared screen radius of a sphere.
pub fn compute_bounds_screen_radius_squared(
    sphere_radius: f32,
    bounds_origin: Vec3,
    view_origin: Vec3,
    projection: &Mat4,
) -> f32 {
    let distance_squared = bounds_origin.distance_squared(view_origin) * projection.z_axis.z;

    let screen_multiple =
        f32::max(0.5 * projection.x_axis.x, 0.5 * projection.y_axis.y) * sphere_radius;

    squared(screen_multiple) / distance_squared.max(1.0)
}

/// Builds the projection matrix used for lod selection.
///
/// The horizontal field of view is fixed by `half_fov` (radians), the vertical one
/// follows from the aspect ratio.
pub fn lod_projection(half_fov: f32, width: f32, height: f32, near: f32, far: f32) -> Mat4 {
    let tan = half_fov.tan();
    let z_scale = if near == far { 1.0 } else { far / (far - near) };

    Mat4::from_cols(
        Vec4::new(1.0 / tan, 0.0, 0.0, 0.0),
        Vec4::new(0.0, width / tan / height, 0.0, 0.0),
        Vec4::new(0.0, 0.0, z_scale, 1.0),
        Vec4::new(0.0, 0.0, -near * z_scale, 0.0),
    )
}
