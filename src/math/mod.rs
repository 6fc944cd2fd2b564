//! Math utilities shared by the lod selection and the culling of terrain sections.

mod culling;
mod lod;

pub use crate::math::{
    culling::{intersect_aabb_frustum, FrustumPlanes},
    lod::{
        bounds_radius, compute_bounds_screen_radius_squared, lod_from_screen_size,
        lod_projection, LodSettings, MIN_LOD_DISTRIBUTION,
    },
};
