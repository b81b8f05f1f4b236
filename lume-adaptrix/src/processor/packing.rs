//! Bit layouts shared by the page writer and the GPU decoder.

use glam::{Vec3, Vec4};
use half::f16;

use crate::processor::types::{Aabb, ClusterKind};
use crate::{AdaptrixError, AdaptrixResult, AdaptrixVertex};

pub const PACKED_INDEX_MAX: u32 = 0x3ff;
pub const CLUSTER_INDEX_COUNT_MAX: usize = 0xff;

#[inline]
pub fn f16_bits(value: f32) -> u32 {
    f16::from_f32(value).to_bits() as u32
}

#[inline]
pub fn f16_value(bits: u32) -> f32 {
    f16::from_bits(bits as u16).to_f32()
}

/// Round-trips a float through half precision.
#[inline]
pub fn quantize_f16(value: f32) -> f32 {
    f16::from_f32(value).to_f32()
}

/// Octahedral encoding into two 16-bit unorm halves, x in the high half.
pub fn pack_octahedral(v: Vec3) -> u32 {
    let n = v / (v.x.abs() + v.y.abs() + v.z.abs()).max(1e-6);
    let t = (-n.z).clamp(0.0, 1.0);
    let x = n.x + if n.x >= 0.0 { t } else { -t };
    let y = n.y + if n.y >= 0.0 { t } else { -t };
    let x = ((x * 0.5 + 0.5).clamp(0.0, 1.0) * 65535.0) as u32;
    let y = ((y * 0.5 + 0.5).clamp(0.0, 1.0) * 65535.0) as u32;
    (x << 16) | (y & 0xffff)
}

pub fn unpack_octahedral(packed: u32) -> Vec3 {
    let x = (packed >> 16) as f32 / 65535.0 * 2.0 - 1.0;
    let y = (packed & 0xffff) as f32 / 65535.0 * 2.0 - 1.0;
    let mut n = Vec3::new(x, y, 1.0 - x.abs() - y.abs());
    let t = (-n.z).clamp(0.0, 1.0);
    n.x += if n.x >= 0.0 { -t } else { t };
    n.y += if n.y >= 0.0 { -t } else { t };
    n.normalize_or_zero()
}

pub fn pack_normal(normal: [f32; 3]) -> u32 {
    pack_octahedral(Vec3::from_array(normal))
}

pub fn pack_tangent(tangent: [f32; 4]) -> u32 {
    pack_octahedral(Vec4::from_array(tangent).truncate())
}

pub fn pack_vertex_position(v: &AdaptrixVertex) -> [u32; 2] {
    let handedness = if v.tangent[3] == 1.0 { 1u32 } else { 0 };
    [
        f16_bits(v.position[0]) << 16 | f16_bits(v.position[1]),
        handedness << 16 | f16_bits(v.position[2]),
    ]
}

pub fn pack_vertex_attributes(v: &AdaptrixVertex) -> [u32; 4] {
    [
        pack_normal(v.normal),
        pack_tangent(v.tangent),
        f16_bits(v.uv1[0]) << 16 | f16_bits(v.uv0[0]),
        f16_bits(v.uv1[1]) << 16 | f16_bits(v.uv0[1]),
    ]
}

/// Three 10-bit indices per word.
pub fn pack_triangle(a: u32, b: u32, c: u32) -> AdaptrixResult<u32> {
    for index in [a, b, c] {
        if index > PACKED_INDEX_MAX {
            return Err(AdaptrixError::IndexOverflow { index });
        }
    }
    Ok((a & 0x3ff) | ((b << 10) & 0xffc00) | ((c << 20) & 0x3ff0_0000))
}

pub fn unpack_triangle(packed: u32) -> [u32; 3] {
    [packed & 0x3ff, (packed >> 10) & 0x3ff, (packed >> 20) & 0x3ff]
}

/// Per-axis `f16(center) << 16 | f16(extent)`.
pub fn pack_bounds(aabb: &Aabb) -> [u32; 3] {
    let c = aabb.center();
    let e = aabb.extents();
    [
        f16_bits(c.x) << 16 | f16_bits(e.x),
        f16_bits(c.y) << 16 | f16_bits(e.y),
        f16_bits(c.z) << 16 | f16_bits(e.z),
    ]
}

/// Returns `(center, extents)`.
pub fn unpack_bounds(packed: &[u32; 3]) -> (Vec3, Vec3) {
    let c = Vec3::new(f16_value(packed[0] >> 16), f16_value(packed[1] >> 16), f16_value(packed[2] >> 16));
    let e = Vec3::new(
        f16_value(packed[0] & 0xffff),
        f16_value(packed[1] & 0xffff),
        f16_value(packed[2] & 0xffff),
    );
    (c, e)
}

/// `index_count << 24 | (group << 2 | kind) & 0xffffff`
pub fn pack_cluster_lod(index_count: usize, group: u32, kind: ClusterKind) -> AdaptrixResult<u32> {
    if index_count > CLUSTER_INDEX_COUNT_MAX {
        return Err(AdaptrixError::ClusterIndexCountOverflow { count: index_count });
    }
    Ok((index_count as u32) << 24 | ((group << 2 | kind as u32) & 0x00ff_ffff))
}

/// Returns `(index_count, group, kind)`.
pub fn unpack_cluster_lod(word: u32) -> (u32, u32, ClusterKind) {
    (word >> 24, (word & 0x00ff_ffff) >> 2, ClusterKind::from_bits(word))
}

/// Screen-space scaled LOD error for a given vertical field of view in degrees.
pub fn projection_error(error: f32, field_of_view: f32) -> f32 {
    error * 500.0 / (field_of_view.to_radians() * 0.5).tan()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangle_packing() {
        let packed = pack_triangle(1, 2, 1023).unwrap();
        assert_eq!(packed, 1 | 2 << 10 | 1023 << 20);
        assert_eq!(unpack_triangle(packed), [1, 2, 1023]);
        assert!(matches!(pack_triangle(0, 1024, 0), Err(AdaptrixError::IndexOverflow { index: 1024 })));
    }

    #[test]
    fn test_cluster_lod_word() {
        let word = pack_cluster_lod(192, 7, ClusterKind::Interior).unwrap();
        assert_eq!(unpack_cluster_lod(word), (192, 7, ClusterKind::Interior));
        assert!(pack_cluster_lod(256, 0, ClusterKind::Leaf).is_err());
    }

    #[test]
    fn test_octahedral_axes() {
        for axis in [Vec3::X, Vec3::Y, Vec3::Z, -Vec3::X, -Vec3::Y, -Vec3::Z] {
            let decoded = unpack_octahedral(pack_octahedral(axis));
            assert!(decoded.distance(axis) < 1e-3, "{:?} -> {:?}", axis, decoded);
        }
        // +Z lands on the centre of the octahedral square
        assert_eq!(pack_octahedral(Vec3::Z), 32767 << 16 | 32767);
    }

    #[test]
    fn test_position_words() {
        let v = AdaptrixVertex {
            position: [1.0, -2.0, 0.5],
            tangent: [1.0, 0.0, 0.0, 1.0],
            ..Default::default()
        };
        let [xy, wz] = pack_vertex_position(&v);
        assert_eq!(f16_value(xy >> 16), 1.0);
        assert_eq!(f16_value(xy & 0xffff), -2.0);
        assert_eq!(wz >> 16, 1);
        assert_eq!(f16_value(wz & 0xffff), 0.5);
    }

    #[test]
    fn test_projection_error_scale() {
        // tan(45deg) == 1 at a 90 degree field of view
        assert!((projection_error(0.02, 90.0) - 10.0).abs() < 1e-4);
        assert!(projection_error(0.02, 60.0) > projection_error(0.01, 60.0));
    }
}
