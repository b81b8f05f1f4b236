//! Fixed-capacity memory pages and their bit-packed contents.

use crate::format::{PageHeader, PlaceholderMesh};
use crate::processor::optimizer;
use crate::processor::packing::*;
use crate::processor::types::*;
use crate::settings::BakeSettings;
use crate::{AdaptrixError, AdaptrixResult, AdaptrixVertex};

#[derive(Clone, Debug, Default)]
pub struct MemoryPage {
    pub positions: Vec<u32>,
    pub attributes: Vec<u32>,
    pub indices: Vec<u32>,
    pub groups: Vec<u32>,
    pub clusters: Vec<u32>,

    pub instance_count: u32,
    pub group_count: u32,
    pub vertex_value_count: u32,
    pub index_value_count: u32,
    pub bounds: Aabb,
    pub leaf_cluster_count: u32,

    pub placeholder: PlaceholderMesh,
}

impl MemoryPage {
    pub fn is_filled(&self) -> bool {
        self.leaf_cluster_count != 0
    }

    pub fn header(&self) -> PageHeader {
        PageHeader {
            bounds: if self.bounds.is_empty() { [0; 3] } else { pack_bounds(&self.bounds) },
            instance_count: self.instance_count,
            group_count: self.group_count,
            vertex_value_count: self.vertex_value_count,
            index_value_count: self.index_value_count,
        }
    }
}

/// Where a group ended up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PlacedGroup {
    pub page: usize,
    pub vertex_count: u32,
}

/// Cluster data of one group, optimized and ready to be appended to a page.
struct PackedGroup {
    vertices: Vec<AdaptrixVertex>,
    index_values: Vec<u32>,
    /// (index value offset, vertex value offset, index count, kind, error), root level first
    clusters: Vec<(u32, u32, usize, ClusterKind, u32)>,
    bounds: Aabb,
}

pub struct PageSet {
    pub pages: Vec<MemoryPage>,
    max_instances: u32,
    max_pages: usize,
    pack_indices: bool,
    pack_group_vertices: bool,
}

impl PageSet {
    pub fn new(settings: &BakeSettings) -> Self {
        if settings.max_page_count > MAX_PAGE_COUNT {
            log::warn!(
                "max_page_count {} exceeds the {} pages the runtime addresses, clamped",
                settings.max_page_count,
                MAX_PAGE_COUNT
            );
        }
        Self {
            pages: Vec::new(),
            max_instances: settings.max_page_instances,
            max_pages: settings.max_page_count.min(MAX_PAGE_COUNT),
            pack_indices: settings.pack_indices,
            pack_group_vertices: settings.pack_group_vertices,
        }
    }

    /// First page with room for `cluster_count` more instances, opening a
    /// new page while under the page limit.
    pub fn select_page(&self, cluster_count: u32) -> Option<usize> {
        self.pages
            .iter()
            .position(|p| p.instance_count + cluster_count <= self.max_instances)
            .or_else(|| {
                (self.pages.len() < self.max_pages && cluster_count <= self.max_instances).then_some(self.pages.len())
            })
    }

    /// Appends a whole group to one page. `Ok(None)` when no page has room;
    /// packing violations are returned and leave every page untouched.
    pub fn add_group(&mut self, group: &ClusterGroupBuild) -> AdaptrixResult<Option<PlacedGroup>> {
        let cluster_count = group.clusters.len() as u32;
        let Some(page_index) = self.select_page(cluster_count) else {
            return Ok(None);
        };

        let packed = self.pack_group(group)?;

        let (vertex_base, index_base) = self
            .pages
            .get(page_index)
            .map(|p| (p.vertex_value_count as u64, p.index_value_count as u64))
            .unwrap_or((0, 0));
        let vertex_values = packed.vertices.len() as u64 * VERTEX_POSITION_WORDS as u64;
        let attribute_end = (vertex_base + vertex_values) * 2;
        let index_end = index_base + packed.index_values.len() as u64;
        if attribute_end > u32::MAX as u64 || index_end > u32::MAX as u64 {
            return Err(AdaptrixError::PageOverflow { page: page_index, values: attribute_end.max(index_end) });
        }

        if page_index == self.pages.len() {
            self.pages.push(MemoryPage::default());
        }
        let page = &mut self.pages[page_index];

        // placeholder: 组内顶点 + 叶子 cluster
        let shift = page.placeholder.vertices.len() as u32;
        page.placeholder.vertices.extend_from_slice(&group.vertices);
        for leaf in group.leaves() {
            page.placeholder.indices.extend(leaf.indices.iter().map(|&i| i + shift));
        }

        for &(index_offset, vertex_offset, index_count, kind, error) in &packed.clusters {
            page.clusters.extend_from_slice(&[
                page.index_value_count + index_offset,
                page.vertex_value_count + vertex_offset,
                pack_cluster_lod(index_count, page.group_count, kind)?,
                error,
            ]);
        }
        page.indices.extend_from_slice(&packed.index_values);

        for v in &packed.vertices {
            page.positions.extend_from_slice(&pack_vertex_position(v));
            page.attributes.extend_from_slice(&pack_vertex_attributes(v));
        }

        let b = pack_bounds(&packed.bounds);
        page.groups.extend_from_slice(&[b[0], b[1], b[2], group.material_index << 16]);

        page.instance_count += cluster_count;
        page.group_count += 1;
        page.vertex_value_count += vertex_values as u32;
        page.index_value_count += packed.index_values.len() as u32;
        page.bounds.merge(&packed.bounds);
        page.leaf_cluster_count += group.leaf_count as u32;

        Ok(Some(PlacedGroup { page: page_index, vertex_count: packed.vertices.len() as u32 }))
    }

    fn pack_group(&self, group: &ClusterGroupBuild) -> AdaptrixResult<PackedGroup> {
        let mut vertices = Vec::new();
        let mut index_buffer: Vec<u32> = Vec::new();
        let mut layout = Vec::with_capacity(group.clusters.len());

        // 根层级在前
        for cluster in group.clusters.iter().rev() {
            if self.pack_group_vertices {
                let mut ib = cluster.indices.clone();
                optimize_cluster(&mut ib, &group.vertices)?;
                layout.push((index_buffer.len(), 0u32, ib.len(), cluster.kind, cluster.error));
                index_buffer.extend_from_slice(&ib);
            } else {
                let mut ib = cluster.indices.clone();
                let local = optimizer::optimize_vertex_fetch(&mut ib, &group.vertices);
                optimize_cluster(&mut ib, &local)?;
                let local = optimizer::optimize_vertex_fetch(&mut ib, &local);
                let vertex_offset = (vertices.len() * VERTEX_POSITION_WORDS) as u32;
                layout.push((index_buffer.len(), vertex_offset, ib.len(), cluster.kind, cluster.error));
                index_buffer.extend_from_slice(&ib);
                vertices.extend(local);
            }
        }

        if self.pack_group_vertices {
            vertices = optimizer::optimize_vertex_fetch(&mut index_buffer, &group.vertices);
        }

        let mut index_values = Vec::with_capacity(index_buffer.len());
        let mut clusters = Vec::with_capacity(layout.len());
        for (start, vertex_offset, count, kind, error) in layout {
            let slice = &index_buffer[start..start + count];
            let offset = index_values.len() as u32;
            if self.pack_indices {
                for tri in slice.chunks_exact(3) {
                    index_values.push(pack_triangle(tri[0], tri[1], tri[2])?);
                }
            } else {
                index_values.extend_from_slice(slice);
            }
            if count > CLUSTER_INDEX_COUNT_MAX {
                return Err(AdaptrixError::ClusterIndexCountOverflow { count });
            }
            clusters.push((offset, vertex_offset, count, kind, error));
        }

        let bounds = Aabb::from_vertices(&vertices);
        Ok(PackedGroup { vertices, index_values, clusters, bounds })
    }

    /// Decimates each page's placeholder mesh at 50% per pass until the
    /// simplifier stops making progress.
    pub fn simplify_placeholders(&mut self, iterations: u32, target_error: f32) {
        for page in &mut self.pages {
            let placeholder = &mut page.placeholder;
            for _ in 0..iterations {
                let target = (placeholder.indices.len() as f32 * 0.5) as usize;
                let simplified = optimizer::simplify(
                    &placeholder.indices,
                    &placeholder.vertices,
                    target,
                    target_error,
                );
                if simplified.indices.len() == placeholder.indices.len() {
                    break;
                }
                let mut indices = simplified.indices;
                placeholder.vertices = optimizer::optimize_vertex_fetch(&mut indices, &placeholder.vertices);
                placeholder.indices = indices;
            }
        }
    }

    pub fn filled_pages(&self) -> impl Iterator<Item = &MemoryPage> {
        self.pages.iter().filter(|p| p.is_filled())
    }
}

fn optimize_cluster(indices: &mut [u32], vertices: &[AdaptrixVertex]) -> AdaptrixResult<()> {
    optimizer::spatial_sort_triangles(indices, vertices);
    optimizer::optimize_vertex_cache(indices, vertices.len());
    optimizer::optimize_overdraw(indices, vertices, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::builder::HierarchyBuilder;
    use crate::processor::optimizer::tests::{grid, noisy_uv_grid};

    fn groups(n: u32, settings: &BakeSettings) -> Vec<ClusterGroupBuild> {
        let (vertices, indices) = grid(n);
        HierarchyBuilder::new(settings).build_submesh(vertices, &indices, 0).unwrap().groups
    }

    #[test]
    fn test_group_never_split_across_pages() {
        let settings = BakeSettings { max_page_instances: 20, ..Default::default() };
        let mut pages = PageSet::new(&settings);
        let built = groups(40, &settings);
        let mut placements = Vec::new();
        for g in &built {
            if let Some(placed) = pages.add_group(g).unwrap() {
                placements.push((placed.page, g.clusters.len() as u32));
            }
        }
        assert_eq!(placements.len(), built.len());
        for (i, page) in pages.pages.iter().enumerate() {
            let expected: u32 = placements.iter().filter(|p| p.0 == i).map(|p| p.1).sum();
            assert_eq!(page.instance_count, expected);
            assert!(page.instance_count <= 20);
            assert_eq!(page.clusters.len(), page.instance_count as usize * CLUSTER_DATA_WORDS);
            assert_eq!(page.groups.len(), page.group_count as usize * GROUP_DATA_WORDS);
            assert_eq!(page.attributes.len(), page.positions.len() * 2);
        }
    }

    #[test]
    fn test_cluster_words_address_page_data() {
        let settings = BakeSettings::default();
        let mut pages = PageSet::new(&settings);
        for g in groups(24, &settings) {
            pages.add_group(&g).unwrap();
        }
        let page = &pages.pages[0];
        for c in page.clusters.chunks_exact(4) {
            let (index_count, group, kind) = unpack_cluster_lod(c[2]);
            assert!(group < page.group_count);
            assert!(index_count as usize <= CLUSTER_MAX_TRIANGLES * 3);
            let words = index_count / 3;
            assert!(c[0] + words <= page.index_value_count);
            assert!(c[1] < page.vertex_value_count);
            if kind.is_leaf() && kind != ClusterKind::LeafRoot {
                assert_eq!(c[3] & 0xffff, 0);
            }
            // every packed index stays inside the group's vertices
            let group_vertex_words = page.vertex_value_count - c[1];
            for &w in &page.indices[c[0] as usize..(c[0] + words) as usize] {
                for i in unpack_triangle(w) {
                    assert!(i * 2 < group_vertex_words);
                }
            }
        }
    }

    #[test]
    fn test_full_pages_reject_group() {
        let settings = BakeSettings { max_page_instances: 4, max_page_count: 1, ..Default::default() };
        let mut pages = PageSet::new(&settings);
        let built = groups(40, &settings);
        let big = built.iter().find(|g| g.clusters.len() > 4).expect("multi-level group");
        assert_eq!(pages.add_group(big).unwrap(), None);
        assert!(pages.pages.is_empty());
    }

    #[test]
    fn test_unpacked_vertices_per_cluster() {
        let settings = BakeSettings { pack_group_vertices: false, ..Default::default() };
        let mut pages = PageSet::new(&settings);
        let built = groups(8, &settings);
        let placed = pages.add_group(&built[0]).unwrap().unwrap();
        let page = &pages.pages[placed.page];
        let offsets: Vec<u32> = page.clusters.chunks_exact(4).map(|c| c[1]).collect();
        assert_eq!(offsets[0], 0);
        assert!(offsets.windows(2).all(|w| w[0] < w[1]) || offsets.len() == 1);
    }

    #[test]
    fn test_placeholder_simplification_shrinks() {
        let settings = BakeSettings::default();
        let mut pages = PageSet::new(&settings);
        for g in groups(32, &settings) {
            pages.add_group(&g).unwrap();
        }
        let before = pages.pages[0].placeholder.indices.len();
        pages.simplify_placeholders(5, 0.1);
        let after = &pages.pages[0].placeholder;
        assert!(after.indices.len() <= before);
        assert!(after.indices.iter().all(|&i| (i as usize) < after.vertices.len()));
    }

    #[test]
    fn test_placeholder_simplification_weighs_attributes() {
        let (vertices, indices) = noisy_uv_grid(16);
        let mut pages = PageSet::new(&BakeSettings::default());
        pages.pages.push(MemoryPage {
            placeholder: PlaceholderMesh { vertices, indices: indices.clone() },
            ..Default::default()
        });
        pages.simplify_placeholders(5, 0.001);
        assert!(pages.pages[0].placeholder.indices.len() > indices.len() / 2);
    }

    #[test]
    fn test_page_count_clamped_to_runtime_limit() {
        let settings = BakeSettings { max_page_instances: 1, max_page_count: 1000, ..Default::default() };
        let mut pages = PageSet::new(&settings);
        let group = groups(4, &settings).remove(0);
        assert_eq!(group.clusters.len(), 1);
        let mut placed = 0;
        while pages.add_group(&group).unwrap().is_some() {
            placed += 1;
        }
        assert_eq!(placed, MAX_PAGE_COUNT);
        assert_eq!(pages.pages.len(), MAX_PAGE_COUNT);
    }
}
