//! Adaptrix: clustered, error-bounded geometry baked into fixed-size memory
//! pages and streamed to the GPU on demand.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

pub mod error;
pub mod format;
pub mod processor;
pub mod settings;
pub mod streaming;

pub use error::{AdaptrixError, AdaptrixResult};
pub use format::{BakeMetadata, PageHeader, PlaceholderMesh};
pub use processor::{BakeOutput, Baker};
pub use settings::{BakeSettings, StreamingSettings};
pub use streaming::{PageStatus, StreamingEngine, StreamingHooks};

/// Interleaved bake vertex. 68 字节, position 必须在偏移 0 (meshopt 的位置流).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct AdaptrixVertex {
    pub position: [f32; 3],
    /// w 为副切线方向 (+1 / -1)
    pub tangent: [f32; 4],
    pub normal: [f32; 3],
    pub color: [f32; 3],
    pub uv0: [f32; 2],
    pub uv1: [f32; 2],
}

impl AdaptrixVertex {
    pub const STRIDE: usize = std::mem::size_of::<AdaptrixVertex>();
    /// Floats following the position, in the order the simplifier weighs them.
    pub const ATTRIBUTE_COUNT: usize = 14;

    pub fn attributes(&self) -> [f32; Self::ATTRIBUTE_COUNT] {
        let mut out = [0.0; Self::ATTRIBUTE_COUNT];
        out[0..4].copy_from_slice(&self.tangent);
        out[4..7].copy_from_slice(&self.normal);
        out[7..10].copy_from_slice(&self.color);
        out[10..12].copy_from_slice(&self.uv0);
        out[12..14].copy_from_slice(&self.uv1);
        out
    }
}
