use std::collections::HashMap;

use crate::processor::optimizer;
use crate::processor::flatten::quantize_positions;
use crate::processor::packing::{f16_bits, projection_error};
use crate::processor::partitioner::partition_clusters;
use crate::processor::types::*;
use crate::settings::BakeSettings;
use crate::{AdaptrixResult, AdaptrixVertex};

/// Result of clustering one submesh.
#[derive(Default)]
pub struct SubmeshHierarchy {
    pub groups: Vec<ClusterGroupBuild>,
    /// Clusters below the triangle budget, across all levels.
    pub degenerate_cluster_count: usize,
}

/// 仿 Nanite 的层级构建: 叶子 cluster -> 分组 -> 组内反复简化/重切分
pub struct HierarchyBuilder<'a> {
    settings: &'a BakeSettings,
}

/// Group-local vertex de-duplication (the "copy indices" list).
struct GroupVertices<'v> {
    source: &'v [AdaptrixVertex],
    remap: HashMap<u32, u32>,
    vertices: Vec<AdaptrixVertex>,
}

impl<'v> GroupVertices<'v> {
    fn new(source: &'v [AdaptrixVertex]) -> Self {
        Self { source, remap: HashMap::new(), vertices: Vec::new() }
    }

    fn local(&mut self, global: u32) -> u32 {
        *self.remap.entry(global).or_insert_with(|| {
            self.vertices.push(self.source[global as usize]);
            (self.vertices.len() - 1) as u32
        })
    }
}

impl<'a> HierarchyBuilder<'a> {
    pub fn new(settings: &'a BakeSettings) -> Self {
        Self { settings }
    }

    /// Builds the cluster hierarchy of one reindexed submesh.
    pub fn build_submesh(
        &self,
        mut vertices: Vec<AdaptrixVertex>,
        indices: &[u32],
        material_index: u32,
    ) -> AdaptrixResult<SubmeshHierarchy> {
        let mut out = SubmeshHierarchy::default();
        if indices.len() < 3 {
            return Ok(out);
        }

        quantize_positions(&mut vertices);

        let mut indices = indices.to_vec();
        optimizer::spatial_sort_triangles(&mut indices, &vertices);
        let leaves = optimizer::build_clusters(&indices, &vertices, CLUSTER_MAX_VERTICES, CLUSTER_MAX_TRIANGLES)?;

        let flat: Vec<u32> = leaves.iter().flatten().copied().collect();
        let counts: Vec<u32> = leaves.iter().map(|c| c.len() as u32).collect();
        let partitions = partition_clusters(&flat, &counts, self.settings.partition_target());

        for partition in partitions {
            let members: Vec<&[u32]> = partition.cluster_indices.iter().map(|&i| leaves[i as usize].as_slice()).collect();
            let group = self.build_group(&vertices, &members, material_index, &mut out.degenerate_cluster_count)?;
            out.groups.push(group);
        }

        log::debug!(
            "submesh: {} triangles -> {} leaf clusters in {} groups",
            indices.len() / 3,
            leaves.len(),
            out.groups.len()
        );
        Ok(out)
    }

    /// Simplifies a group of sibling leaf clusters level by level until it
    /// collapses to a single cluster, stalls, or hits the iteration cap.
    pub fn build_group(
        &self,
        vertices: &[AdaptrixVertex],
        leaves: &[&[u32]],
        material_index: u32,
        degenerate_cluster_count: &mut usize,
    ) -> AdaptrixResult<ClusterGroupBuild> {
        let fov = self.settings.field_of_view;
        let iterations = self.settings.hierarchy_iterations.max(1);

        let mut group_vertices = GroupVertices::new(vertices);
        let mut clusters: Vec<Vec<u32>> = Vec::new();
        let mut lod_indices: Vec<u32> = Vec::new();

        let mut kinds: Vec<ClusterKind> = Vec::new();
        let mut errors: Vec<u32> = Vec::new();
        let mut child_kinds: Vec<ClusterKind> = Vec::new();
        let mut child_errors: Vec<u32> = Vec::new();

        let leaf_count = leaves.len();
        for leaf in leaves {
            let local: Vec<u32> = leaf.iter().map(|&g| group_vertices.local(g)).collect();
            lod_indices.extend_from_slice(&local);
            if local.len() / 3 < CLUSTER_MAX_TRIANGLES {
                *degenerate_cluster_count += 1;
            }
            clusters.push(local);
            child_kinds.push(if leaf_count == 1 { ClusterKind::LeafRoot } else { ClusterKind::Leaf });
            child_errors.push(0);
        }
        let packed = group_vertices.vertices;

        if leaf_count > 1 {
            let mut self_error = 0.0f32;
            let mut previous_count = leaf_count;

            for j in 0..iterations {
                let target = (lod_indices.len() as f32 * 0.5) as usize;
                let simplified = optimizer::simplify(
                    &lod_indices,
                    &packed,
                    target,
                    self.settings.target_error,
                );
                let reached_simplify_limit = simplified.indices.len() == lod_indices.len()
                    || simplified.error == 0.0
                    || simplified.indices.is_empty();

                let mut next_indices = simplified.indices;
                optimizer::spatial_sort_triangles(&mut next_indices, &packed);
                let parents = optimizer::build_clusters(&next_indices, &packed, CLUSTER_MAX_VERTICES, CLUSTER_MAX_TRIANGLES)?;

                self_error += simplified.error;
                let level_error = f16_bits(projection_error(self_error, fov));
                for e in &mut child_errors {
                    *e |= level_error << 16;
                }

                let reached_cluster_limit = parents.len() == previous_count;
                previous_count = parents.len();

                if reached_simplify_limit || reached_cluster_limit {
                    // 第一层就失败: 叶子即根, 误差清零; 否则上一层成为终端层
                    let (kind, keep_error) = if j == 0 { (ClusterKind::LeafRoot, false) } else { (ClusterKind::Root, true) };
                    child_kinds.fill(kind);
                    if !keep_error {
                        child_errors.fill(0);
                    }
                    break;
                }

                kinds.append(&mut child_kinds);
                errors.append(&mut child_errors);

                let reached_root = parents.len() == 1 || j == iterations - 1;
                for parent in parents {
                    if parent.len() / 3 < CLUSTER_MAX_TRIANGLES {
                        *degenerate_cluster_count += 1;
                    }
                    clusters.push(parent);
                    child_kinds.push(if reached_root { ClusterKind::Root } else { ClusterKind::Interior });
                    child_errors.push(level_error);
                }

                if reached_root {
                    break;
                }
                lod_indices = next_indices;
            }
        }

        kinds.append(&mut child_kinds);
        errors.append(&mut child_errors);
        debug_assert_eq!(kinds.len(), clusters.len());

        let clusters = clusters
            .into_iter()
            .zip(kinds.into_iter().zip(errors))
            .map(|(indices, (kind, error))| BuiltCluster { indices, kind, error })
            .collect();

        Ok(ClusterGroupBuild { vertices: packed, clusters, leaf_count, material_index })
    }
}
