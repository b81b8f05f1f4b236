use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::AdaptrixVertex;

pub const CLUSTER_MAX_TRIANGLES: usize = 64;
pub const CLUSTER_MAX_VERTICES: usize = 120;
/// Instance slots (clusters) per memory page.
pub const PAGE_MAX_INSTANCES: u32 = 1600;
pub const MAX_PAGE_COUNT: usize = 256;

pub const CLUSTER_DATA_WORDS: usize = 4;
pub const GROUP_DATA_WORDS: usize = 4;
pub const VERTEX_POSITION_WORDS: usize = 2;
pub const VERTEX_ATTRIBUTE_WORDS: usize = 4;

/// Attribute weights for hierarchy simplification, matching `AdaptrixVertex::attributes`.
/// tangent xyz / w, normal, color, uv0, uv1
pub const SIMPLIFY_ATTRIBUTE_WEIGHTS: [f32; AdaptrixVertex::ATTRIBUTE_COUNT] = [
    0.5, 0.5, 0.5, 0.0, //
    0.8, 0.8, 0.8, //
    0.0, 0.0, 0.0, //
    0.5, 0.5, //
    0.2, 0.2,
];

/// 2-bit node kind stored in the low bits of the cluster LOD word.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterKind {
    /// 叶子且无父层级
    LeafRoot = 0,
    Leaf = 1,
    Interior = 2,
    /// 最后一个被记录的层级
    Root = 3,
}

impl ClusterKind {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => ClusterKind::LeafRoot,
            1 => ClusterKind::Leaf,
            2 => ClusterKind::Interior,
            _ => ClusterKind::Root,
        }
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, ClusterKind::LeafRoot | ClusterKind::Leaf)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ClusterKind::LeafRoot | ClusterKind::Root)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::new(f32::MAX, f32::MAX, f32::MAX),
        max: Vec3::new(f32::MIN, f32::MIN, f32::MIN),
    };

    pub fn from_vertices(vertices: &[AdaptrixVertex]) -> Self {
        let mut aabb = Self::EMPTY;
        for v in vertices {
            aabb.extend(Vec3::from_array(v.position));
        }
        aabb
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    pub fn extend(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn merge(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn center(&self) -> Vec3 {
        (self.max + self.min) * 0.5
    }

    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }
}

/// One cluster of a group, indices local to the group's packed vertex list.
#[derive(Clone, Debug)]
pub struct BuiltCluster {
    pub indices: Vec<u32>,
    pub kind: ClusterKind,
    /// `(parent_error_f16 << 16) | self_error_f16`
    pub error: u32,
}

impl BuiltCluster {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn self_error_bits(&self) -> u16 {
        (self.error & 0xffff) as u16
    }

    pub fn parent_error_bits(&self) -> u16 {
        (self.error >> 16) as u16
    }
}

/// A cluster group with its whole LOD hierarchy, in build order (leaves first).
#[derive(Clone, Debug)]
pub struct ClusterGroupBuild {
    pub vertices: Vec<AdaptrixVertex>,
    pub clusters: Vec<BuiltCluster>,
    pub leaf_count: usize,
    pub material_index: u32,
}

impl ClusterGroupBuild {
    pub fn leaves(&self) -> &[BuiltCluster] {
        &self.clusters[..self.leaf_count]
    }
}
