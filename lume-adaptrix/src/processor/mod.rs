pub mod types;
pub mod optimizer;
pub mod partitioner;
pub mod packing;
pub mod flatten;
pub mod builder;
pub mod page;
pub mod baker;

pub use types::*;
pub use baker::{BakeOutput, BakeProgress, BakeStats, Baker, MaterialFilter, MaterialTable, RenderQueueFilter, SceneSource};
pub use builder::HierarchyBuilder;
pub use flatten::{MaterialDesc, MeshData, SubMesh, SurfaceBatch, Topology};
pub use page::{MemoryPage, PageSet};
