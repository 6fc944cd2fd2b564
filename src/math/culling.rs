use bevy::{
    math::Vec3A,
    render::primitives::{Aabb, Frustum, HalfSpace},
};

/// The six planes of a view frustum, captured once per frame.
///
/// Each plane stores its normal pointing into the frustum and its distance,
/// so a point `p` is inside if `dot(normal, p) + d >= 0` for all planes.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrustumPlanes(pub [HalfSpace; 6]);

impl From<&Frustum> for FrustumPlanes {
    fn from(frustum: &Frustum) -> Self {
        Self(frustum.half_spaces)
    }
}

impl FrustumPlanes {
    /// Tests the axis aligned box against all six planes.
    ///
    /// The box is rejected as soon as it lies entirely behind one of the planes.
    /// This test is conservative: boxes close to a frustum corner may be accepted
    /// although they are outside.
    #[inline]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        intersect_aabb_frustum(&self.0, aabb)
    }
}

/// Plane distance minus the box extent projected onto the plane normal.
pub fn intersect_aabb_frustum(planes: &[HalfSpace], aabb: &Aabb) -> bool {
    planes.iter().all(|plane| {
        let normal: Vec3A = plane.normal();
        let distance = normal.dot(aabb.center) + plane.d();
        let radius = aabb.half_extents.dot(normal.abs());

        distance + radius >= 0.0
    })
}
