use std::collections::VecDeque;

use lume_core::{BufferDescriptor, BufferUsage, Device, LumeResult};

/// Upload buffers recycled only once enough newer frames have been queued
/// behind them for the GPU to be done reading.
pub struct FencedBufferPool<D: Device> {
    buffers: Vec<D::Buffer>,
    free: Vec<usize>,
    in_flight: VecDeque<usize>,
    current: Option<usize>,
    size: u64,
    queued_frames: usize,
}

impl<D: Device> FencedBufferPool<D> {
    pub fn new(size: u64, queued_frames: usize) -> Self {
        Self {
            buffers: Vec::new(),
            free: Vec::new(),
            in_flight: VecDeque::new(),
            current: None,
            size,
            queued_frames,
        }
    }

    fn fence_depth(&self) -> usize {
        self.queued_frames.max(3) + 1
    }

    fn recover(&mut self) {
        while self.in_flight.len() > self.fence_depth() {
            if let Some(id) = self.in_flight.pop_front() {
                self.free.push(id);
            }
        }
    }

    /// Reserves a buffer for writing, creating one when every buffer is fenced.
    pub fn begin_frame(&mut self, device: &D) -> LumeResult<&D::Buffer> {
        debug_assert!(self.current.is_none());
        self.recover();
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                self.buffers.push(device.create_buffer(BufferDescriptor {
                    size: self.size,
                    usage: BufferUsage::STORAGE | BufferUsage::COPY_SRC | BufferUsage::MAP_WRITE,
                    mapped_at_creation: true,
                })?);
                self.buffers.len() - 1
            }
        };
        self.current = Some(id);
        Ok(&self.buffers[id])
    }

    pub fn current(&self) -> Option<&D::Buffer> {
        self.current.map(|id| &self.buffers[id])
    }

    /// Releases the current buffer to the fence queue.
    pub fn end_frame(&mut self) {
        if let Some(id) = self.current.take() {
            self.in_flight.push_back(id);
        }
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}
