use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::path::Path;

use crate::format::{write_bake, BakeMetadata};
use crate::processor::builder::HierarchyBuilder;
use crate::processor::flatten::*;
use crate::processor::optimizer;
use crate::processor::page::{MemoryPage, PageSet};
use crate::settings::BakeSettings;
use crate::{AdaptrixError, AdaptrixResult};

/// Render queues treated as opaque geometry.
pub const OPAQUE_QUEUE_RANGE: RangeInclusive<i32> = 2000..=2500;

/// Supplies the surfaces to bake.
pub trait SceneSource {
    fn surfaces(&self) -> &[SurfaceBatch];
}

impl SceneSource for Vec<SurfaceBatch> {
    fn surfaces(&self) -> &[SurfaceBatch] {
        self
    }
}

impl SceneSource for [SurfaceBatch] {
    fn surfaces(&self) -> &[SurfaceBatch] {
        self
    }
}

/// Decides which materials take part in the bake.
pub trait MaterialFilter {
    fn accepts(&self, material: &MaterialDesc) -> bool;
}

/// Accepts materials by shader name and render queue.
#[derive(Clone, Debug, Default)]
pub struct RenderQueueFilter {
    /// Empty accepts every shader.
    pub shaders: Vec<String>,
    pub queue_range: Option<RangeInclusive<i32>>,
}

impl RenderQueueFilter {
    pub fn new(shaders: Vec<String>, opaque_only: bool) -> Self {
        Self { shaders, queue_range: opaque_only.then_some(OPAQUE_QUEUE_RANGE) }
    }
}

impl MaterialFilter for RenderQueueFilter {
    fn accepts(&self, material: &MaterialDesc) -> bool {
        let shader_ok = self.shaders.is_empty() || self.shaders.iter().any(|s| *s == material.shader);
        let queue_ok = self.queue_range.as_ref().is_none_or(|r| r.contains(&material.render_queue));
        shader_ok && queue_ok
    }
}

/// Materials de-duplicated by id, in first-seen order.
#[derive(Clone, Debug, Default)]
pub struct MaterialTable {
    materials: Vec<MaterialDesc>,
    lookup: HashMap<u64, u32>,
}

impl MaterialTable {
    pub fn index_of(&mut self, material: &MaterialDesc) -> u32 {
        if let Some(&index) = self.lookup.get(&material.id) {
            return index;
        }
        let index = self.materials.len() as u32;
        self.materials.push(material.clone());
        self.lookup.insert(material.id, index);
        index
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn materials(&self) -> &[MaterialDesc] {
        &self.materials
    }
}

/// Progress callback, polled once per surface. Returning `false` cancels the bake.
pub trait BakeProgress {
    fn report(&mut self, done: usize, total: usize, surface: &str) -> bool;
}

impl<F: FnMut(usize, usize, &str) -> bool> BakeProgress for F {
    fn report(&mut self, done: usize, total: usize, surface: &str) -> bool {
        self(done, total, surface)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BakeStats {
    pub surface_count: usize,
    pub submesh_count: usize,
    pub skipped_submeshes: usize,
    pub group_count: usize,
    pub dropped_groups: usize,
    pub cluster_count: usize,
    pub leaf_cluster_count: usize,
    pub degenerate_cluster_count: usize,
    pub instance_count: u32,
    pub filled_pages: usize,
    pub min_page_instances: u32,
    pub max_page_instances: u32,
    pub max_vertex_values: u32,
    pub max_index_values: u32,
    pub max_group_count: u32,
    pub material_count: usize,
    /// Mean over filled pages of leaf clusters per instance slot.
    pub average_leaf_ratio: f32,
}

impl BakeStats {
    /// Page aggregates. Pages without leaf clusters are left out.
    pub(crate) fn collect_pages(&mut self, pages: &[MemoryPage], page_capacity: u32) {
        let mut ratio_sum = 0.0f32;
        for page in pages.iter().filter(|p| p.is_filled()) {
            self.filled_pages += 1;
            self.instance_count += page.instance_count;
            self.min_page_instances = if self.filled_pages == 1 {
                page.instance_count
            } else {
                self.min_page_instances.min(page.instance_count)
            };
            self.max_page_instances = self.max_page_instances.max(page.instance_count);
            self.max_vertex_values = self.max_vertex_values.max(page.vertex_value_count);
            self.max_index_values = self.max_index_values.max(page.index_value_count);
            self.max_group_count = self.max_group_count.max(page.group_count);
            ratio_sum += page.leaf_cluster_count as f32 / page_capacity.max(1) as f32;
        }
        if self.filled_pages > 0 {
            self.average_leaf_ratio = ratio_sum / self.filled_pages as f32;
        }
    }

    pub fn degenerate_ratio(&self) -> f32 {
        if self.cluster_count == 0 { 0.0 } else { self.degenerate_cluster_count as f32 / self.cluster_count as f32 }
    }
}

pub struct BakeOutput {
    pub pages: Vec<MemoryPage>,
    pub materials: Vec<MaterialDesc>,
    pub material_vertex_counts: Vec<u32>,
    pub stats: BakeStats,
}

impl BakeOutput {
    pub fn metadata(&self) -> BakeMetadata {
        BakeMetadata::from_pages(&self.pages, self.material_vertex_counts.clone())
    }

    pub fn write<P: AsRef<Path>>(&self, dir: P) -> anyhow::Result<()> {
        write_bake(dir.as_ref(), &self.pages, &self.metadata())
    }
}

pub struct Baker {
    settings: BakeSettings,
    filter: Box<dyn MaterialFilter>,
}

impl Baker {
    pub fn new(settings: BakeSettings) -> Self {
        let filter = RenderQueueFilter::new(Vec::new(), settings.opaque_only);
        Self { settings, filter: Box::new(filter) }
    }

    pub fn with_filter<F: MaterialFilter + 'static>(mut self, filter: F) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn settings(&self) -> &BakeSettings {
        &self.settings
    }

    /// Bakes every accepted surface of the scene into memory pages.
    pub fn bake<S, P>(&self, scene: &S, progress: &mut P) -> AdaptrixResult<BakeOutput>
    where
        S: SceneSource + ?Sized,
        P: BakeProgress,
    {
        let builder = HierarchyBuilder::new(&self.settings);
        let mut pages = PageSet::new(&self.settings);
        let mut materials = MaterialTable::default();
        let mut material_vertex_counts: Vec<u32> = Vec::new();
        let mut stats = BakeStats::default();

        let surfaces = scene.surfaces();
        for (i, surface) in surfaces.iter().enumerate() {
            if !progress.report(i, surfaces.len(), &surface.name) {
                log::info!("bake cancelled at surface {} of {}", i, surfaces.len());
                return Err(AdaptrixError::Cancelled);
            }

            if surface.mesh.submeshes.len() != surface.materials.len() {
                log::debug!(
                    "skip {}: {} submeshes but {} materials",
                    surface.name,
                    surface.mesh.submeshes.len(),
                    surface.materials.len()
                );
                continue;
            }
            stats.surface_count += 1;

            let mesh = with_shading_streams(&surface.mesh);
            let flip = surface.is_odd_negative_scale();
            let world_vertices = flatten_vertices(&mesh, &surface.local_to_world);

            for (submesh, material) in mesh.submeshes.iter().zip(&surface.materials) {
                if submesh.topology != Topology::Triangles {
                    log::debug!("skip {}: {:?} topology", surface.name, submesh.topology);
                    stats.skipped_submeshes += 1;
                    continue;
                }
                if !self.filter.accepts(material) {
                    log::debug!("skip {}: material {} filtered", surface.name, material.name);
                    stats.skipped_submeshes += 1;
                    continue;
                }
                let indices = submesh_indices(submesh, flip);
                if indices.len() < 3 {
                    stats.skipped_submeshes += 1;
                    continue;
                }

                let material_index = materials.index_of(material);
                if material_vertex_counts.len() < materials.len() {
                    material_vertex_counts.resize(materials.len(), 0);
                }

                let (vertices, indices) = optimizer::reindex(&world_vertices, &indices);
                let hierarchy = builder.build_submesh(vertices, &indices, material_index)?;
                stats.submesh_count += 1;
                stats.degenerate_cluster_count += hierarchy.degenerate_cluster_count;

                for group in &hierarchy.groups {
                    stats.group_count += 1;
                    match pages.add_group(group) {
                        Ok(Some(placed)) => {
                            material_vertex_counts[material_index as usize] += placed.vertex_count;
                            stats.cluster_count += group.clusters.len();
                            stats.leaf_cluster_count += group.leaf_count;
                        }
                        Ok(None) => {
                            log::warn!(
                                "{}: no page has room for a group of {} clusters, dropped",
                                surface.name,
                                group.clusters.len()
                            );
                            stats.dropped_groups += 1;
                        }
                        Err(e @ AdaptrixError::PageOverflow { .. }) => return Err(e),
                        Err(e) => {
                            log::error!("{}: {}, group dropped", surface.name, e);
                            stats.dropped_groups += 1;
                        }
                    }
                }
            }
        }

        if self.settings.simplify_placeholders {
            pages.simplify_placeholders(self.settings.placeholder_iterations, self.settings.placeholder_target_error);
        }

        stats.material_count = materials.len();
        stats.collect_pages(&pages.pages, self.settings.max_page_instances);
        log::info!(
            "baked {} instances into {} pages (min {} / max {} per page), {} submeshes, \
             degenerate clusters {:.1}%, average leaf clusters per page {:.1}%, max vertex values {}, max index values {}, \
             max groups {}, {} materials",
            stats.instance_count,
            stats.filled_pages,
            stats.min_page_instances,
            stats.max_page_instances,
            stats.submesh_count,
            stats.degenerate_ratio() * 100.0,
            stats.average_leaf_ratio * 100.0,
            stats.max_vertex_values,
            stats.max_index_values,
            stats.max_group_count,
            stats.material_count
        );

        Ok(BakeOutput {
            pages: pages.pages,
            materials: materials.materials,
            material_vertex_counts,
            stats,
        })
    }
}

/// Fills in normals and tangents when the mesh lacks them.
fn with_shading_streams(mesh: &MeshData) -> Cow<'_, MeshData> {
    let needs_normals = mesh.normals.is_none();
    let needs_tangents = mesh.tangents.is_none() && mesh.uv0.is_some();
    if !needs_normals && !needs_tangents {
        return Cow::Borrowed(mesh);
    }
    let mut owned = mesh.clone();
    if needs_normals {
        owned.recalculate_normals();
    }
    if needs_tangents {
        owned.recalculate_tangents();
    }
    Cow::Owned(owned)
}
