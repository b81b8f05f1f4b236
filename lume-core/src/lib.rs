pub mod device;
pub mod error;
pub mod headless;

pub use device::{Buffer, BufferDescriptor, BufferUsage, Device};
pub use error::{LumeError, LumeResult};
