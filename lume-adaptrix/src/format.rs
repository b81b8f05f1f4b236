//! On-disk layout of a bake: one header and one data file per memory page,
//! a global metadata file, and the placeholder meshes.
//!
//! All words are little-endian u32.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::processor::page::MemoryPage;
use crate::processor::types::{Aabb, CLUSTER_DATA_WORDS, GROUP_DATA_WORDS, MAX_PAGE_COUNT};
use crate::{AdaptrixError, AdaptrixResult, AdaptrixVertex};

pub const METADATA_FILE: &str = "metadata.vmesh";
pub const PLACEHOLDER_FILE: &str = "placeholders.bin";
pub const HEADER_EXTENSION: &str = "vmesh";
pub const DATA_EXTENSION: &str = "vmeshdata";

/// File stem of page `index`: 8 upper-case hex digits of `index + 1`.
pub fn page_file_stem(index: usize) -> String {
    format!("{:08X}", index + 1)
}

pub fn page_header_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{}.{}", page_file_stem(index), HEADER_EXTENSION))
}

pub fn page_data_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{}.{}", page_file_stem(index), DATA_EXTENSION))
}

/// Page count the runtime addresses for a bake: the next of 32, 64, 128, 256.
pub fn padded_page_count(filled: usize) -> usize {
    match filled {
        0..=32 => 32,
        33..=64 => 64,
        65..=128 => 128,
        _ => MAX_PAGE_COUNT,
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PageHeader {
    pub bounds: [u32; 3],
    pub instance_count: u32,
    pub group_count: u32,
    pub vertex_value_count: u32,
    pub index_value_count: u32,
}

impl PageHeader {
    pub const WORDS: usize = 7;

    pub fn to_words(&self) -> [u32; Self::WORDS] {
        [
            self.bounds[0],
            self.bounds[1],
            self.bounds[2],
            self.instance_count,
            self.group_count,
            self.vertex_value_count,
            self.index_value_count,
        ]
    }

    pub fn from_words(w: &[u32]) -> Option<Self> {
        if w.len() < Self::WORDS {
            return None;
        }
        Some(Self {
            bounds: [w[0], w[1], w[2]],
            instance_count: w[3],
            group_count: w[4],
            vertex_value_count: w[5],
            index_value_count: w[6],
        })
    }

    /// Words in the page's data file.
    pub fn data_word_count(&self) -> usize {
        self.vertex_value_count as usize * 3
            + self.index_value_count as usize
            + self.group_count as usize * GROUP_DATA_WORDS
            + self.instance_count as usize * CLUSTER_DATA_WORDS
    }

    pub fn read(path: &Path) -> AdaptrixResult<Self> {
        let words = read_words(path)?;
        Self::from_words(&words).ok_or_else(|| AdaptrixError::CorruptFile {
            path: path.display().to_string(),
            reason: format!("expected {} header words, found {}", Self::WORDS, words.len()),
        })
    }
}

/// Bake-wide constants used to size the runtime buffers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BakeMetadata {
    pub filled_page_count: u32,
    pub total_instance_count: u32,
    pub max_vertex_value_count: u32,
    pub max_index_value_count: u32,
    pub max_group_count: u32,
    pub bounds_center: Vec3,
    pub bounds_extents: Vec3,
    pub total_vertex_count: u32,
    pub material_vertex_counts: Vec<u32>,
}

impl BakeMetadata {
    pub fn from_pages(pages: &[MemoryPage], material_vertex_counts: Vec<u32>) -> Self {
        let mut meta = BakeMetadata::default();
        let mut bounds = Aabb::EMPTY;
        for page in pages.iter().filter(|p| p.is_filled()) {
            meta.filled_page_count += 1;
            meta.total_instance_count += page.instance_count;
            meta.max_vertex_value_count = meta.max_vertex_value_count.max(page.vertex_value_count);
            meta.max_index_value_count = meta.max_index_value_count.max(page.index_value_count);
            meta.max_group_count = meta.max_group_count.max(page.group_count);
            bounds.merge(&page.bounds);
        }
        if !bounds.is_empty() {
            meta.bounds_center = bounds.center();
            meta.bounds_extents = bounds.extents();
        }
        meta.total_vertex_count = material_vertex_counts.iter().sum();
        meta.material_vertex_counts = material_vertex_counts;
        meta
    }

    pub fn to_words(&self) -> Vec<u32> {
        let mut w = vec![
            self.filled_page_count,
            self.total_instance_count,
            self.max_vertex_value_count,
            self.max_index_value_count,
            self.max_group_count,
        ];
        w.extend(self.bounds_center.to_array().map(f32::to_bits));
        w.extend(self.bounds_extents.to_array().map(f32::to_bits));
        w.push(self.total_vertex_count);
        w.push(self.material_vertex_counts.len() as u32);
        w.extend_from_slice(&self.material_vertex_counts);
        w
    }

    pub fn from_words(w: &[u32]) -> Option<Self> {
        if w.len() < 13 {
            return None;
        }
        let material_count = w[12] as usize;
        let materials = w.get(13..13 + material_count)?;
        let f = |i: usize| f32::from_bits(w[i]);
        Some(Self {
            filled_page_count: w[0],
            total_instance_count: w[1],
            max_vertex_value_count: w[2],
            max_index_value_count: w[3],
            max_group_count: w[4],
            bounds_center: Vec3::new(f(5), f(6), f(7)),
            bounds_extents: Vec3::new(f(8), f(9), f(10)),
            total_vertex_count: w[11],
            material_vertex_counts: materials.to_vec(),
        })
    }

    pub fn read(dir: &Path) -> AdaptrixResult<Self> {
        let path = dir.join(METADATA_FILE);
        if !path.exists() {
            return Err(AdaptrixError::MissingBake(dir.display().to_string()));
        }
        let words = read_words(&path)?;
        Self::from_words(&words).ok_or_else(|| AdaptrixError::CorruptFile {
            path: path.display().to_string(),
            reason: "truncated metadata".to_string(),
        })
    }
}

/// Coarse stand-in mesh drawn while a page is not resident.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderMesh {
    pub vertices: Vec<AdaptrixVertex>,
    pub indices: Vec<u32>,
}

impl PlaceholderMesh {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

pub fn write_words<W: Write>(writer: &mut W, words: &[u32]) -> std::io::Result<()> {
    for w in words {
        writer.write_all(&w.to_le_bytes())?;
    }
    Ok(())
}

pub fn words_from_bytes(bytes: &[u8], out: &mut [u32]) {
    for (dst, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        *dst = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}

pub fn read_words(path: &Path) -> AdaptrixResult<Vec<u32>> {
    let bytes = std::fs::read(path)?;
    let mut words = vec![0u32; bytes.len() / 4];
    words_from_bytes(&bytes, &mut words);
    Ok(words)
}

/// Writes every page, the metadata and the placeholders into `dir`. Pages
/// past the filled ones, up to the padded page count, are written empty.
pub fn write_bake(dir: &Path, pages: &[MemoryPage], metadata: &BakeMetadata) -> anyhow::Result<()> {
    use anyhow::Context;
    if pages.len() > MAX_PAGE_COUNT {
        anyhow::bail!("{} pages exceed the {} the runtime addresses", pages.len(), MAX_PAGE_COUNT);
    }
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create bake directory: {:?}", dir))?;

    let page_count = padded_page_count(pages.len());
    for i in 0..page_count {
        let page = pages.get(i);
        let header = page.map(MemoryPage::header).unwrap_or_default();

        let mut writer = BufWriter::new(File::create(page_header_path(dir, i))?);
        write_words(&mut writer, &header.to_words())?;
        writer.flush()?;

        let file = File::create(page_data_path(dir, i))?;
        let mut writer = BufWriter::with_capacity(1024 * 1024, file);
        if let Some(page) = page {
            write_words(&mut writer, &page.positions)?;
            write_words(&mut writer, &page.attributes)?;
            write_words(&mut writer, &page.indices)?;
            write_words(&mut writer, &page.groups)?;
            write_words(&mut writer, &page.clusters)?;
        }
        writer.flush()?;
    }

    let mut writer = BufWriter::new(File::create(dir.join(METADATA_FILE))?);
    write_words(&mut writer, &metadata.to_words())?;
    writer.flush()?;

    let placeholders: Vec<PlaceholderMesh> = pages.iter().map(|p| p.placeholder.clone()).collect();
    let writer = BufWriter::new(File::create(dir.join(PLACEHOLDER_FILE))?);
    bincode::serialize_into(writer, &placeholders).context("Failed to write placeholders")?;

    log::info!("wrote {} pages ({} filled) to {:?}", page_count, metadata.filled_page_count, dir);
    Ok(())
}

pub fn read_placeholders(dir: &Path) -> anyhow::Result<Vec<PlaceholderMesh>> {
    use anyhow::Context;
    let path = dir.join(PLACEHOLDER_FILE);
    let file = File::open(&path).with_context(|| format!("Failed to open placeholders: {:?}", path))?;
    let placeholders = bincode::deserialize_from(std::io::BufReader::new(file))
        .with_context(|| format!("Failed to decode placeholders: {:?}", path))?;
    Ok(placeholders)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_naming() {
        assert_eq!(page_file_stem(0), "00000001");
        assert_eq!(page_file_stem(254), "000000FF");
        let dir = Path::new("bake");
        assert_eq!(page_header_path(dir, 9), dir.join("0000000A.vmesh"));
        assert_eq!(page_data_path(dir, 9), dir.join("0000000A.vmeshdata"));
    }

    #[test]
    fn test_padded_page_count() {
        assert_eq!(padded_page_count(0), 32);
        assert_eq!(padded_page_count(32), 32);
        assert_eq!(padded_page_count(33), 64);
        assert_eq!(padded_page_count(100), 128);
        assert_eq!(padded_page_count(129), 256);
    }

    #[test]
    fn test_header_words() {
        let header = PageHeader {
            bounds: [1, 2, 3],
            instance_count: 40,
            group_count: 5,
            vertex_value_count: 600,
            index_value_count: 300,
        };
        let words = header.to_words();
        assert_eq!(words, [1, 2, 3, 40, 5, 600, 300]);
        assert_eq!(bytemuck::cast::<PageHeader, [u32; 7]>(header), words);
        assert_eq!(PageHeader::from_words(&words), Some(header));
        assert_eq!(header.data_word_count(), 1800 + 300 + 20 + 160);
        assert_eq!(PageHeader::from_words(&words[..6]), None);
    }

    #[test]
    fn test_metadata_words() {
        let meta = BakeMetadata {
            filled_page_count: 2,
            total_instance_count: 99,
            max_vertex_value_count: 10,
            max_index_value_count: 20,
            max_group_count: 3,
            bounds_center: Vec3::new(1.0, 2.0, 3.0),
            bounds_extents: Vec3::new(0.5, 0.5, 0.5),
            total_vertex_count: 7,
            material_vertex_counts: vec![4, 3],
        };
        let words = meta.to_words();
        assert_eq!(words.len(), 15);
        assert_eq!(BakeMetadata::from_words(&words), Some(meta));
        assert_eq!(BakeMetadata::from_words(&words[..14]), None);
    }

    #[test]
    fn test_write_rejects_unaddressable_pages() {
        let dir = std::env::temp_dir().join(format!("lume-format-overflow-{}", std::process::id()));
        let pages = vec![MemoryPage::default(); MAX_PAGE_COUNT + 1];
        let result = write_bake(&dir, &pages, &BakeMetadata::from_pages(&pages, Vec::new()));
        assert!(result.is_err());
        assert!(!dir.exists());
    }
}
