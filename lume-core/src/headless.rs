//! CPU-side device used by the baker tooling and by tests. Every buffer is a
//! plain byte vector, copies execute immediately.

use crate::device::{Buffer, BufferDescriptor, BufferUsage, Device};
use crate::{LumeError, LumeResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct HeadlessDevice {
    allocated: Arc<AtomicU64>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently held by live buffers created from this device.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }
}

pub struct HeadlessBuffer {
    data: Mutex<Vec<u8>>,
    size: u64,
    usage: BufferUsage,
    allocated: Arc<AtomicU64>,
}

impl Drop for HeadlessBuffer {
    fn drop(&mut self) {
        self.allocated.fetch_sub(self.size, Ordering::Relaxed);
    }
}

impl HeadlessBuffer {
    fn check_range(&self, offset: u64, len: u64) -> LumeResult<()> {
        if offset.checked_add(len).is_none_or(|end| end > self.size) {
            return Err(LumeError::OutOfBounds { offset, len, size: self.size });
        }
        Ok(())
    }

    /// Copy of the whole buffer contents.
    pub fn contents(&self) -> LumeResult<Vec<u8>> {
        let data = self.data.lock().map_err(|_| LumeError::Generic("headless buffer poisoned"))?;
        Ok(data.clone())
    }
}

impl Buffer for HeadlessBuffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn usage(&self) -> BufferUsage {
        self.usage
    }

    fn write_data(&self, offset: u64, data: &[u8]) -> LumeResult<()> {
        self.check_range(offset, data.len() as u64)?;
        let mut dst = self.data.lock().map_err(|_| LumeError::Generic("headless buffer poisoned"))?;
        let start = offset as usize;
        dst[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_data(&self, offset: u64, data: &mut [u8]) -> LumeResult<()> {
        self.check_range(offset, data.len() as u64)?;
        let src = self.data.lock().map_err(|_| LumeError::Generic("headless buffer poisoned"))?;
        let start = offset as usize;
        data.copy_from_slice(&src[start..start + data.len()]);
        Ok(())
    }
}

impl Device for HeadlessDevice {
    type Buffer = HeadlessBuffer;

    fn wait_idle(&self) -> LumeResult<()> {
        Ok(())
    }

    fn create_buffer(&self, descriptor: BufferDescriptor) -> LumeResult<Self::Buffer> {
        let size = usize::try_from(descriptor.size).map_err(|_| LumeError::OutOfMemory)?;
        self.allocated.fetch_add(descriptor.size, Ordering::Relaxed);
        log::trace!("headless buffer: {} bytes, usage {:#x}", size, descriptor.usage.0);
        Ok(HeadlessBuffer {
            data: Mutex::new(vec![0u8; size]),
            size: descriptor.size,
            usage: descriptor.usage,
            allocated: self.allocated.clone(),
        })
    }

    fn copy_buffer_to_buffer(
        &self,
        source: &Self::Buffer,
        source_offset: u64,
        destination: &Self::Buffer,
        destination_offset: u64,
        size: u64,
    ) -> LumeResult<()> {
        let mut staging = vec![0u8; size as usize];
        source.read_data(source_offset, &mut staging)?;
        destination.write_data(destination_offset, &staging)
    }
}
