//! Thin wrappers over meshoptimizer, specialised for `AdaptrixVertex` buffers.

use meshopt::{ffi, SimplifyOptions, VertexDataAdapter};

use crate::processor::types::SIMPLIFY_ATTRIBUTE_WEIGHTS;
use crate::{AdaptrixError, AdaptrixResult, AdaptrixVertex};

pub struct Simplified {
    pub indices: Vec<u32>,
    /// Relative error reported by the simplifier (0 when nothing moved).
    pub error: f32,
}

fn position_adapter(vertices: &[AdaptrixVertex]) -> AdaptrixResult<VertexDataAdapter<'_>> {
    VertexDataAdapter::new(bytemuck::cast_slice(vertices), AdaptrixVertex::STRIDE, 0)
        .map_err(|e| AdaptrixError::Geometry(format!("{:?}", e)))
}

fn positions_ptr(vertices: &[AdaptrixVertex]) -> *const f32 {
    vertices.as_ptr() as *const f32
}

/// Removes duplicate vertices and rewrites the index buffer so vertices
/// appear in first-use order.
pub fn reindex(vertices: &[AdaptrixVertex], indices: &[u32]) -> (Vec<AdaptrixVertex>, Vec<u32>) {
    let (vertex_count, remap) = meshopt::generate_vertex_remap(vertices, Some(indices));
    let new_vertices = meshopt::remap_vertex_buffer(vertices, vertex_count, &remap);
    let new_indices = meshopt::remap_index_buffer(Some(indices), indices.len(), &remap);
    (new_vertices, new_indices)
}

pub fn optimize_vertex_cache(indices: &mut [u32], vertex_count: usize) {
    meshopt::optimize_vertex_cache_in_place(indices, vertex_count);
}

pub fn optimize_overdraw(indices: &mut [u32], vertices: &[AdaptrixVertex], threshold: f32) -> AdaptrixResult<()> {
    let adapter = position_adapter(vertices)?;
    meshopt::optimize_overdraw_in_place(indices, &adapter, threshold);
    Ok(())
}

/// Reorders vertices by first use and drops unreferenced ones. Indices are
/// rewritten in place; the returned buffer is the compacted vertex list.
pub fn optimize_vertex_fetch(indices: &mut [u32], vertices: &[AdaptrixVertex]) -> Vec<AdaptrixVertex> {
    meshopt::optimize_vertex_fetch(indices, vertices)
}

/// Border-locking simplification towards `target_index_count`, weighing
/// tangent, normal and uv streams alongside position.
pub fn simplify(
    indices: &[u32],
    vertices: &[AdaptrixVertex],
    target_index_count: usize,
    target_error: f32,
) -> Simplified {
    if indices.is_empty() || vertices.is_empty() {
        return Simplified { indices: Vec::new(), error: 0.0 };
    }
    let Ok(adapter) = position_adapter(vertices) else {
        return Simplified { indices: indices.to_vec(), error: 0.0 };
    };

    let attributes: Vec<f32> = vertices.iter().flat_map(|v| v.attributes()).collect();
    let locks = vec![false; vertices.len()];
    let mut error = 0.0f32;
    let indices = meshopt::simplify_with_attributes_and_locks(
        indices,
        &adapter,
        &attributes,
        &SIMPLIFY_ATTRIBUTE_WEIGHTS,
        AdaptrixVertex::ATTRIBUTE_COUNT * std::mem::size_of::<f32>(),
        &locks,
        target_index_count,
        target_error,
        SimplifyOptions::LockBorder,
        Some(&mut error),
    );
    Simplified { indices, error }
}

pub fn cluster_count_bound(index_count: usize, max_vertices: usize, max_triangles: usize) -> usize {
    unsafe { ffi::meshopt_buildMeshletsBound(index_count, max_vertices, max_triangles) }
}

/// Splits the triangle list into clusters. Each cluster is returned as a
/// triangle list of indices into `vertices`.
pub fn build_clusters(
    indices: &[u32],
    vertices: &[AdaptrixVertex],
    max_vertices: usize,
    max_triangles: usize,
) -> AdaptrixResult<Vec<Vec<u32>>> {
    if indices.is_empty() {
        return Ok(Vec::new());
    }
    let adapter = position_adapter(vertices)?;
    let meshlets = meshopt::build_meshlets(indices, &adapter, max_vertices, max_triangles, 0.0);

    let mut clusters = Vec::with_capacity(meshlets.len());
    for m in meshlets.iter() {
        clusters.push(m.triangles.iter().map(|&t| m.vertices[t as usize]).collect());
    }
    Ok(clusters)
}

/// Reorders triangles for spatial locality.
pub fn spatial_sort_triangles(indices: &mut [u32], vertices: &[AdaptrixVertex]) {
    if indices.is_empty() {
        return;
    }
    let mut sorted = vec![0u32; indices.len()];
    unsafe {
        ffi::meshopt_spatialSortTriangles(
            sorted.as_mut_ptr(),
            indices.as_ptr(),
            indices.len(),
            positions_ptr(vertices),
            vertices.len(),
            AdaptrixVertex::STRIDE,
        );
    }
    indices.copy_from_slice(&sorted);
}
