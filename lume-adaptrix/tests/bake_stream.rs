use std::path::PathBuf;
use std::sync::Arc;

use glam::{Mat4, Vec3};
use lume_adaptrix::format::{page_data_path, read_words, BakeMetadata, PageHeader};
use lume_adaptrix::processor::packing::unpack_cluster_lod;
use lume_adaptrix::processor::*;
use lume_adaptrix::streaming::{PageRequest, Slot, StreamingStats};
use lume_adaptrix::{BakeSettings, PageStatus, PlaceholderMesh, StreamingEngine, StreamingHooks, StreamingSettings};
use lume_core::headless::HeadlessDevice;

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("lume-bake-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn material(id: u64) -> MaterialDesc {
    MaterialDesc { id, name: format!("m{}", id), shader: "Lit".into(), render_queue: 2000 }
}

fn grid_mesh(n: u32) -> MeshData {
    let mut positions = Vec::new();
    let mut uv0 = Vec::new();
    for z in 0..=n {
        for x in 0..=n {
            let (u, v) = (x as f32 / n as f32, z as f32 / n as f32);
            // gentle bumps so the simplifier has something to measure
            positions.push([u * 4.0, ((u * 9.0).sin() * (v * 7.0).cos()) * 0.2, v * 4.0]);
            uv0.push([u, v]);
        }
    }
    let row = n + 1;
    let mut indices = Vec::new();
    for z in 0..n {
        for x in 0..n {
            let i = z * row + x;
            indices.extend_from_slice(&[i, i + row, i + 1, i + 1, i + row, i + row + 1]);
        }
    }
    MeshData {
        positions,
        uv0: Some(uv0),
        submeshes: vec![SubMesh { topology: Topology::Triangles, indices }],
        ..Default::default()
    }
}

fn triangle_mesh() -> MeshData {
    MeshData {
        positions: vec![[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]],
        submeshes: vec![SubMesh { topology: Topology::Triangles, indices: vec![0, 1, 2] }],
        ..Default::default()
    }
}

fn bake(scene: &Vec<SurfaceBatch>, settings: BakeSettings) -> BakeOutput {
    Baker::new(settings).bake(scene, &mut |_: usize, _: usize, _: &str| true).unwrap()
}

fn words(bytes: &[u8]) -> Vec<u32> {
    bytes.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

#[test]
fn single_triangle_is_one_leaf_root() {
    let scene = vec![SurfaceBatch::new("tri", Arc::new(triangle_mesh()), Mat4::IDENTITY, vec![material(1)])];
    let output = bake(&scene, BakeSettings::default());

    assert_eq!(output.pages.len(), 1);
    let page = &output.pages[0];
    assert_eq!(page.instance_count, 1);
    assert_eq!(page.leaf_cluster_count, 1);
    assert_eq!(page.group_count, 1);
    let (index_count, group, kind) = unpack_cluster_lod(page.clusters[2]);
    assert_eq!((index_count, group, kind), (3, 0, ClusterKind::LeafRoot));
    assert_eq!(page.clusters[3], 0);
    assert_eq!(output.material_vertex_counts, vec![3]);
}

#[test]
fn pages_respect_capacity_without_splitting_groups() {
    let settings = BakeSettings { max_page_instances: 20, ..Default::default() };
    let scene = vec![SurfaceBatch::new("grid", Arc::new(grid_mesh(48)), Mat4::IDENTITY, vec![material(1)])];
    let output = bake(&scene, settings);

    assert!(output.pages.len() >= 2, "{} pages", output.pages.len());
    assert_eq!(output.stats.dropped_groups, 0);
    for page in &output.pages {
        assert!(page.instance_count <= 20);
        // every cluster word points at a group of its own page, and each group's clusters are contiguous
        let groups: Vec<u32> = page.clusters.chunks_exact(4).map(|c| unpack_cluster_lod(c[2]).1).collect();
        assert!(groups.iter().all(|&g| g < page.group_count));
        assert!(groups.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(groups.last().copied(), Some(page.group_count - 1));
    }
    let total: u32 = output.pages.iter().map(|p| p.instance_count).sum();
    assert_eq!(total as usize, output.stats.cluster_count);
}

fn placeholder_normals(placeholder: &PlaceholderMesh) -> Vec<Vec3> {
    placeholder
        .indices
        .chunks_exact(3)
        .map(|t| {
            let [a, b, c] = [t[0], t[1], t[2]].map(|i| Vec3::from_array(placeholder.vertices[i as usize].position));
            (b - a).cross(c - a).normalize()
        })
        .collect()
}

#[test]
fn mirrored_parent_keeps_faces_outward() {
    let settings = BakeSettings { simplify_placeholders: false, ..Default::default() };
    let mirror = Mat4::from_scale(Vec3::new(-1.0, 1.0, 1.0));

    // identity child under a mirrored parent
    let mirrored = SurfaceBatch::from_hierarchy("mirrored", Arc::new(triangle_mesh()), vec![Mat4::IDENTITY, mirror], vec![material(1)]);
    let plain = SurfaceBatch::from_hierarchy("plain", Arc::new(triangle_mesh()), vec![Mat4::IDENTITY, Mat4::IDENTITY], vec![material(1)]);
    assert!(mirrored.is_odd_negative_scale());
    assert!(!plain.is_odd_negative_scale());

    let flipped = bake(&vec![mirrored], settings.clone());
    let kept = bake(&vec![plain], settings);
    let a = placeholder_normals(&flipped.pages[0].placeholder);
    let b = placeholder_normals(&kept.pages[0].placeholder);
    assert_eq!(a.len(), 1);
    assert!(flipped.pages[0].placeholder.vertices.iter().any(|v| v.position[0] < 0.0));
    // the source triangle faces +Y; the mirrored copy must too
    assert!(b[0].dot(Vec3::Y) > 0.99, "{:?}", b);
    assert!(a[0].dot(Vec3::Y) > 0.99, "{:?}", a);
}

#[test]
fn empty_bake_reports_without_pages() {
    let output = bake(&Vec::new(), BakeSettings::default());
    assert_eq!(output.stats.filled_pages, 0);
    assert_eq!(output.stats.average_leaf_ratio, 0.0);
    assert_eq!(output.stats.degenerate_ratio(), 0.0);

    let dir = temp_dir("empty");
    output.write(&dir).unwrap();
    let meta = BakeMetadata::read(&dir).unwrap();
    assert_eq!(meta.filled_page_count, 0);
    assert_eq!(PageHeader::read(&lume_adaptrix::format::page_header_path(&dir, 31)).unwrap(), PageHeader::default());

    // no geometry: the runtime refuses to start
    let engine = StreamingEngine::open(HeadlessDevice::new(), &dir, StreamingSettings::default());
    assert!(!engine.is_initialized());
    drop(engine);
    std::fs::remove_dir_all(&dir).ok();
}

#[derive(Default)]
struct Recorder {
    activated: Vec<u32>,
    deactivated: Vec<u32>,
    materials: Vec<usize>,
    placeholders: Vec<u32>,
}

impl StreamingHooks for Recorder {
    fn activate_placeholder(&mut self, page: u32) {
        self.activated.push(page);
    }

    fn deactivate_placeholder(&mut self, page: u32) {
        self.deactivated.push(page);
    }

    fn draw_material(&mut self, material: usize, _args_offset: u64) {
        self.materials.push(material);
    }

    fn draw_placeholder(&mut self, page: u32, _mesh: &PlaceholderMesh) {
        self.placeholders.push(page);
    }
}

fn feedback(page_count: usize, requested: &[u32], too_far: &[u32]) -> Vec<u32> {
    (0..page_count as u32)
        .map(|page| {
            PageRequest {
                page,
                lod_level: if requested.contains(&page) { 1 } else { 0 },
                too_far: too_far.contains(&page),
            }
            .encode()
        })
        .collect()
}

#[test]
fn bake_write_and_stream() {
    let settings = BakeSettings { max_page_instances: 20, simplify_placeholders: false, ..Default::default() };
    let scene = vec![
        SurfaceBatch::new("a", Arc::new(grid_mesh(48)), Mat4::IDENTITY, vec![material(1)]),
        SurfaceBatch::new("b", Arc::new(grid_mesh(16)), Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)), vec![material(2)]),
    ];
    let output = bake(&scene, settings);
    assert!(output.pages.len() >= 4);

    let dir = temp_dir("stream");
    output.write(&dir).unwrap();
    let meta = BakeMetadata::read(&dir).unwrap();
    assert_eq!(meta, output.metadata());

    let streaming = StreamingSettings {
        upload_buffer_count: 2,
        max_loadable_pages: 2,
        placeholders_enabled: true,
        ..Default::default()
    };
    let device = HeadlessDevice::new();
    let mut engine = StreamingEngine::with_hooks(device, &dir, streaming, Recorder::default());
    assert!(engine.is_initialized());
    engine.wait_for_headers().unwrap();
    assert!(engine.is_ready());
    assert_eq!(engine.page_count(), 32);
    assert_eq!(engine.slots(), &[Slot::Free, Slot::Free]);

    // three pages requested, two slots
    engine.process_feedback(&feedback(32, &[0, 1, 2], &[3]));
    engine.flush();
    assert_eq!(engine.page_status(0), Some(PageStatus::Loaded));
    assert_eq!(engine.page_status(1), Some(PageStatus::Loaded));
    assert_eq!(engine.page_status(2), Some(PageStatus::Waiting));
    assert_eq!(engine.page_status(3), Some(PageStatus::TooFar));
    assert_eq!(engine.stats(), StreamingStats { unloaded: 28, waiting: 1, loading: 0, loaded: 2, too_far: 1, jobs_running: 0 });
    assert_eq!(engine.hooks().activated, vec![0, 1, 2, 3]);

    // resident positions of each slot match the page file
    let buffers = engine.resident_buffers().unwrap();
    let positions = words(&buffers.positions.contents().unwrap());
    let status = words(&buffers.page_status.contents().unwrap());
    let stride = buffers.strides.vertex as usize;
    for (slot, &page) in status.iter().enumerate() {
        let data = read_words(&page_data_path(&dir, page as usize)).unwrap();
        let count = output.pages[page as usize].vertex_value_count as usize;
        assert_eq!(&positions[slot * stride..slot * stride + count], &data[..count]);
    }
    let page_data = words(&buffers.page_data.contents().unwrap());
    assert_eq!(page_data[3], output.pages[0].instance_count);

    // page 0 leaves the view, page 2 takes its slot
    engine.process_feedback(&feedback(32, &[1, 2], &[3]));
    engine.flush();
    assert_eq!(engine.page_status(0), Some(PageStatus::Unloaded));
    assert_eq!(engine.page_status(2), Some(PageStatus::Loaded));
    let resident: Vec<Slot> = engine.slots().to_vec();
    assert!(resident.contains(&Slot::Resident(1)) && resident.contains(&Slot::Resident(2)));
    assert!(engine.hooks().deactivated.contains(&2));

    engine.update();
    assert_eq!(engine.hooks().materials, vec![0, 1]);
    assert_eq!(engine.hooks().placeholders, vec![3]);

    // page 1 moves beyond the load distance
    engine.process_feedback(&feedback(32, &[1, 2], &[1, 3]));
    engine.flush();
    assert_eq!(engine.page_status(1), Some(PageStatus::TooFar));
    assert!(engine.slots().contains(&Slot::Free));

    engine.set_shadow_cascade_count(2).unwrap();
    assert_eq!(engine.draw_resources().unwrap().cascade_count, 2);

    drop(engine);
    std::fs::remove_dir_all(&dir).ok();
}
