/// Backend-neutral device. Only the buffer side of the API is needed by the
/// geometry streaming path; pipelines and passes are owned by the host renderer.
pub trait Device: Sized + Clone {
    type Buffer: Buffer;

    /// Wait for the device to be idle.
    fn wait_idle(&self) -> crate::LumeResult<()>;

    fn create_buffer(&self, descriptor: BufferDescriptor) -> crate::LumeResult<Self::Buffer>;

    /// Record a buffer-to-buffer copy. Backends with a command stream may
    /// defer it until the next submission; the headless backend copies immediately.
    fn copy_buffer_to_buffer(
        &self,
        source: &Self::Buffer,
        source_offset: u64,
        destination: &Self::Buffer,
        destination_offset: u64,
        size: u64,
    ) -> crate::LumeResult<()>;
}

pub trait Buffer {
    fn size(&self) -> u64;
    fn usage(&self) -> BufferUsage;
    fn write_data(&self, offset: u64, data: &[u8]) -> crate::LumeResult<()>;
    fn read_data(&self, offset: u64, data: &mut [u8]) -> crate::LumeResult<()>;
}

#[derive(Clone, Copy, Debug)]
pub struct BufferDescriptor {
    pub size: u64,
    pub usage: BufferUsage,
    pub mapped_at_creation: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BufferUsage(pub u32);

impl BufferUsage {
    pub const VERTEX: Self = Self(1 << 0);
    pub const INDEX: Self = Self(1 << 1);
    pub const UNIFORM: Self = Self(1 << 2);
    pub const STORAGE: Self = Self(1 << 3);
    pub const COPY_SRC: Self = Self(1 << 4);
    pub const COPY_DST: Self = Self(1 << 5);
    pub const INDIRECT: Self = Self(1 << 6);
    pub const MAP_WRITE: Self = Self(1 << 7);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
