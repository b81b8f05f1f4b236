//! Runtime page streaming: feedback decode, residency, background reads and
//! the GPU buffers the culling and draw passes bind.

pub mod draw;
pub mod engine;
pub mod feedback;
pub mod jobs;
pub mod pool;
pub mod residency;
pub mod resident;
pub mod visibility;

pub use draw::{DrawResources, IndirectDrawIndexedArgs};
pub use engine::{NoHooks, Slot, StreamingEngine, StreamingHooks, StreamingStats};
pub use feedback::PageRequest;
pub use residency::PageStatus;
pub use resident::{PageStrides, ResidentBuffers};
