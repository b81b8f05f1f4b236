use anyhow::{bail, Context, Result};
use lume_adaptrix::format::{padded_page_count, page_header_path, read_placeholders};
use lume_adaptrix::processor::{Baker, MaterialDesc, MeshData, SubMesh, SurfaceBatch, Topology};
use lume_adaptrix::{BakeMetadata, BakeSettings, PageHeader};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

const USAGE: &str = "Usage:
  lume-processor bake <out_dir> <input.obj>... [--config bake.toml]
  lume-processor inspect <dir>";

fn main() -> Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("bake") => bake(&args[1..]),
        Some("inspect") if args.len() == 2 => inspect(Path::new(&args[1])),
        _ => {
            println!("{}", USAGE);
            Ok(())
        }
    }
}

fn bake(args: &[String]) -> Result<()> {
    let mut config: Option<PathBuf> = None;
    let mut paths: Vec<PathBuf> = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let path = iter.next().context("--config needs a file")?;
            config = Some(PathBuf::from(path));
        } else {
            paths.push(PathBuf::from(arg));
        }
    }
    if paths.len() < 2 {
        bail!("{}", USAGE);
    }
    let out_dir = paths.remove(0);

    let settings = match &config {
        Some(path) => BakeSettings::load(path)?,
        None => BakeSettings::default(),
    };

    let start_total = Instant::now();
    let mut scene = Vec::new();
    for (file_index, path) in paths.iter().enumerate() {
        scene.extend(load_obj_scene(path, file_index as u64)?);
    }
    println!("Loaded {} surfaces in {:.2}s", scene.len(), start_total.elapsed().as_secs_f32());

    let bake_start = Instant::now();
    let mut progress = |done: usize, total: usize, name: &str| {
        log::debug!("[{}/{}] {}", done + 1, total, name);
        true
    };
    let output = Baker::new(settings).bake(&scene, &mut progress)?;
    println!(
        "Baked {} clusters into {} pages in {:.2}s",
        output.stats.instance_count,
        output.stats.filled_pages,
        bake_start.elapsed().as_secs_f32()
    );

    output.write(&out_dir)?;
    println!("Saved to {:?}", out_dir);
    println!("Total execution time: {:.2}s", start_total.elapsed().as_secs_f32());
    Ok(())
}

/// One surface per OBJ object, one material per object.
fn load_obj_scene(path: &Path, file_index: u64) -> Result<Vec<SurfaceBatch>> {
    let (models, materials) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS)
        .with_context(|| format!("Failed to load OBJ file: {:?}", path))?;
    // 缺少 .mtl 时仍然烘焙, 使用默认材质
    let materials = materials.unwrap_or_else(|e| {
        log::warn!("{:?}: no materials ({}), using defaults", path, e);
        Vec::new()
    });

    let surfaces = models
        .into_iter()
        .filter(|model| !model.mesh.indices.is_empty())
        .map(|model| {
            let mesh = model.mesh;
            let material_id = mesh.material_id.unwrap_or(usize::MAX);
            let material = MaterialDesc {
                id: file_index << 32 | (material_id as u64 & 0xffff_ffff),
                name: materials.get(material_id).map_or_else(|| "default".to_string(), |m| m.name.clone()),
                shader: "Standard".to_string(),
                render_queue: 2000,
            };

            let data = MeshData {
                positions: mesh.positions.chunks_exact(3).map(|p| [p[0], p[1], p[2]]).collect(),
                normals: (!mesh.normals.is_empty()).then(|| mesh.normals.chunks_exact(3).map(|n| [n[0], n[1], n[2]]).collect()),
                colors: (!mesh.vertex_color.is_empty())
                    .then(|| mesh.vertex_color.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect()),
                uv0: (!mesh.texcoords.is_empty()).then(|| mesh.texcoords.chunks_exact(2).map(|t| [t[0], t[1]]).collect()),
                submeshes: vec![SubMesh { topology: Topology::Triangles, indices: mesh.indices }],
                ..Default::default()
            };
            SurfaceBatch::new(model.name, Arc::new(data), glam::Mat4::IDENTITY, vec![material])
        })
        .collect();
    Ok(surfaces)
}

fn inspect(dir: &Path) -> Result<()> {
    let meta = BakeMetadata::read(dir).with_context(|| format!("Failed to read bake: {:?}", dir))?;
    let page_count = padded_page_count(meta.filled_page_count as usize);

    println!("{:?}", dir);
    println!("  pages: {} filled / {} addressed", meta.filled_page_count, page_count);
    println!("  instances: {}", meta.total_instance_count);
    println!(
        "  max per page: {} vertex values, {} index values, {} groups",
        meta.max_vertex_value_count, meta.max_index_value_count, meta.max_group_count
    );
    println!("  bounds: center {} extents {}", meta.bounds_center, meta.bounds_extents);
    println!("  vertices: {} across {} materials", meta.total_vertex_count, meta.material_vertex_counts.len());

    for page in 0..meta.filled_page_count as usize {
        let header = PageHeader::read(&page_header_path(dir, page))?;
        println!(
            "  page {:3}: {:5} instances, {:4} groups, {:7} vertex values, {:7} index values",
            page, header.instance_count, header.group_count, header.vertex_value_count, header.index_value_count
        );
    }

    match read_placeholders(dir) {
        Ok(placeholders) => {
            let triangles: usize = placeholders.iter().map(|p| p.indices.len() / 3).sum();
            println!("  placeholders: {} meshes, {} triangles", placeholders.len(), triangles);
        }
        Err(e) => println!("  placeholders: unavailable ({:#})", e),
    }
    Ok(())
}
