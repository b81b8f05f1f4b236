//! Scene-side input types and world-space flattening of surfaces.

use glam::{Mat3, Mat4, Vec2, Vec3};

use crate::processor::packing::quantize_f16;
use crate::AdaptrixVertex;

const MISSING_COLOR: [f32; 3] = [0.0, 1.0, 1.0];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Topology {
    Triangles,
    Lines,
    Points,
}

#[derive(Clone, Debug)]
pub struct SubMesh {
    pub topology: Topology,
    pub indices: Vec<u32>,
}

/// Source mesh in object space. Optional streams must match `positions` in length.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub tangents: Option<Vec<[f32; 4]>>,
    pub colors: Option<Vec<[f32; 3]>>,
    pub uv0: Option<Vec<[f32; 2]>>,
    pub uv1: Option<Vec<[f32; 2]>>,
    pub submeshes: Vec<SubMesh>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaterialDesc {
    /// Identity used to merge materials across surfaces.
    pub id: u64,
    pub name: String,
    pub shader: String,
    pub render_queue: i32,
}

/// One renderer instance: a mesh, its placement, and one material per submesh.
#[derive(Clone, Debug)]
pub struct SurfaceBatch {
    pub name: String,
    pub mesh: std::sync::Arc<MeshData>,
    pub local_to_world: Mat4,
    /// Parent-relative transforms of the node, then of each ancestor up to the root.
    pub node_chain: Vec<Mat4>,
    pub materials: Vec<MaterialDesc>,
}

impl SurfaceBatch {
    /// Batch for a root-level node.
    pub fn new(name: impl Into<String>, mesh: std::sync::Arc<MeshData>, local_to_world: Mat4, materials: Vec<MaterialDesc>) -> Self {
        Self {
            name: name.into(),
            mesh,
            local_to_world,
            node_chain: vec![local_to_world],
            materials,
        }
    }

    /// Batch for a nested node. `node_chain` starts at the node itself.
    pub fn from_hierarchy(
        name: impl Into<String>,
        mesh: std::sync::Arc<MeshData>,
        node_chain: Vec<Mat4>,
        materials: Vec<MaterialDesc>,
    ) -> Self {
        let local_to_world = node_chain.iter().rev().fold(Mat4::IDENTITY, |world, local| world * *local);
        Self { name: name.into(), mesh, local_to_world, node_chain, materials }
    }

    pub fn is_odd_negative_scale(&self) -> bool {
        odd_negative_scale(&self.node_chain)
    }
}

/// XOR of the mirroring flag of every node in the chain.
pub fn odd_negative_scale(node_chain: &[Mat4]) -> bool {
    node_chain
        .iter()
        .fold(false, |odd, m| odd ^ (Mat3::from_mat4(*m).determinant() < 0.0))
}

/// Transforms every vertex of the mesh into world space.
pub fn flatten_vertices(mesh: &MeshData, local_to_world: &Mat4) -> Vec<AdaptrixVertex> {
    let mut vertices = Vec::with_capacity(mesh.positions.len());
    for i in 0..mesh.positions.len() {
        let position = local_to_world.transform_point3(Vec3::from_array(mesh.positions[i]));
        let normal = mesh
            .normals
            .as_ref()
            .map(|n| local_to_world.transform_vector3(Vec3::from_array(n[i])))
            .unwrap_or(Vec3::ZERO);
        let tangent = mesh
            .tangents
            .as_ref()
            .map(|t| {
                let xyz = local_to_world.transform_vector3(Vec3::new(t[i][0], t[i][1], t[i][2]));
                [xyz.x, xyz.y, xyz.z, t[i][3]]
            })
            .unwrap_or([0.0; 4]);

        vertices.push(AdaptrixVertex {
            position: position.to_array(),
            tangent,
            normal: normal.to_array(),
            color: mesh.colors.as_ref().map(|c| c[i]).unwrap_or(MISSING_COLOR),
            uv0: mesh.uv0.as_ref().map(|u| u[i]).unwrap_or([0.0; 2]),
            uv1: mesh.uv1.as_ref().map(|u| u[i]).unwrap_or([0.0; 2]),
        });
    }
    vertices
}

/// Copies a submesh's triangle list, swapping the first two corners of each
/// triangle when the transform mirrors geometry.
pub fn submesh_indices(submesh: &SubMesh, flip_winding: bool) -> Vec<u32> {
    let mut indices: Vec<u32> = submesh.indices[..submesh.indices.len() / 3 * 3].to_vec();
    if flip_winding {
        for tri in indices.chunks_exact_mut(3) {
            tri.swap(0, 1);
        }
    }
    indices
}

pub fn quantize_positions(vertices: &mut [AdaptrixVertex]) {
    for v in vertices {
        for p in &mut v.position {
            *p = quantize_f16(*p);
        }
    }
}

impl MeshData {
    /// Area-weighted vertex normals over all triangle submeshes.
    pub fn recalculate_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.positions.len()];
        for tri in self.triangles() {
            let [a, b, c] = tri.map(|i| Vec3::from_array(self.positions[i as usize]));
            let n = (b - a).cross(c - a);
            for i in tri {
                normals[i as usize] += n;
            }
        }
        self.normals = Some(normals.into_iter().map(|n| n.normalize_or_zero().to_array()).collect());
    }

    /// Per-vertex tangents from uv0, Gram-Schmidt orthogonalised against the
    /// normal. No-op without normals or uv0.
    pub fn recalculate_tangents(&mut self) {
        let (Some(normals), Some(uvs)) = (self.normals.as_ref(), self.uv0.as_ref()) else {
            return;
        };
        let mut tan = vec![Vec3::ZERO; self.positions.len()];
        let mut bitan = vec![Vec3::ZERO; self.positions.len()];
        for tri in self.triangles() {
            let [p0, p1, p2] = tri.map(|i| Vec3::from_array(self.positions[i as usize]));
            let [w0, w1, w2] = tri.map(|i| Vec2::from_array(uvs[i as usize]));
            let (e1, e2) = (p1 - p0, p2 - p0);
            let (d1, d2) = (w1 - w0, w2 - w0);
            let det = d1.x * d2.y - d2.x * d1.y;
            if det.abs() < 1e-12 {
                continue;
            }
            let r = 1.0 / det;
            let sdir = (e1 * d2.y - e2 * d1.y) * r;
            let tdir = (e2 * d1.x - e1 * d2.x) * r;
            for i in tri {
                tan[i as usize] += sdir;
                bitan[i as usize] += tdir;
            }
        }

        let tangents = (0..self.positions.len())
            .map(|i| {
                let n = Vec3::from_array(normals[i]);
                let t = (tan[i] - n * n.dot(tan[i])).normalize_or_zero();
                let w = if n.cross(t).dot(bitan[i]) < 0.0 { -1.0 } else { 1.0 };
                [t.x, t.y, t.z, w]
            })
            .collect();
        self.tangents = Some(tangents);
    }

    fn triangles(&self) -> Vec<[u32; 3]> {
        self.submeshes
            .iter()
            .filter(|s| s.topology == Topology::Triangles)
            .flat_map(|s| s.indices.chunks_exact(3).map(|c| [c[0], c[1], c[2]]))
            .collect()
    }
}
