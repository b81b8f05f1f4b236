use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::processor::types::{MAX_PAGE_COUNT, PAGE_MAX_INSTANCES};

/// Knobs for the offline bake. Defaults reproduce the production settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeSettings {
    /// Pack three 10-bit indices per u32. Limits cluster groups to five leaves.
    pub pack_indices: bool,
    /// Share one de-duplicated vertex buffer across all clusters of a group.
    pub pack_group_vertices: bool,
    pub simplify_placeholders: bool,
    /// Target error handed to the simplifier for every hierarchy level.
    pub target_error: f32,
    /// Vertical field of view in degrees used for projected LOD errors.
    pub field_of_view: f32,
    pub max_page_instances: u32,
    pub max_page_count: usize,
    pub opaque_only: bool,
    pub hierarchy_iterations: u32,
    pub placeholder_iterations: u32,
    pub placeholder_target_error: f32,
}

impl Default for BakeSettings {
    fn default() -> Self {
        Self {
            pack_indices: true,
            pack_group_vertices: true,
            simplify_placeholders: true,
            target_error: 0.01,
            field_of_view: 60.0,
            max_page_instances: PAGE_MAX_INSTANCES,
            max_page_count: MAX_PAGE_COUNT,
            opaque_only: true,
            hierarchy_iterations: 8,
            placeholder_iterations: 5,
            placeholder_target_error: 0.1,
        }
    }
}

impl BakeSettings {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        load_toml(path.as_ref())
    }

    /// Leaf clusters per group handed to the partitioner.
    pub fn partition_target(&self) -> usize {
        if self.pack_indices { 5 } else { 16 }
    }
}

/// Runtime streaming configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Upload buffers and concurrent page reads.
    pub upload_buffer_count: usize,
    pub max_loadable_pages: usize,
    /// Frames an upload buffer stays fenced after release.
    pub fence_frames: usize,
    pub camera_load_distance: f32,
    pub placeholders_enabled: bool,
    pub shadow_cascade_count: u32,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            upload_buffer_count: 12,
            max_loadable_pages: 128,
            fence_frames: 3,
            camera_load_distance: 20.0,
            placeholders_enabled: false,
            shadow_cascade_count: 1,
        }
    }
}

impl StreamingSettings {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        load_toml(path.as_ref())
    }
}

fn load_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> anyhow::Result<T> {
    use anyhow::Context;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {:?}", path))?;
    toml::from_str(&text).with_context(|| format!("Failed to parse settings file: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: BakeSettings = toml::from_str("pack_indices = false\nfield_of_view = 90.0\n").unwrap();
        assert!(!settings.pack_indices);
        assert_eq!(settings.field_of_view, 90.0);
        assert_eq!(settings.max_page_instances, 1600);
        assert_eq!(settings.partition_target(), 16);
        assert_eq!(BakeSettings::default().partition_target(), 5);
    }

    #[test]
    fn test_streaming_defaults() {
        let settings: StreamingSettings = toml::from_str("").unwrap();
        assert_eq!(settings, StreamingSettings::default());
        assert_eq!(settings.upload_buffer_count, 12);
        assert_eq!(settings.max_loadable_pages, 128);
    }
}
