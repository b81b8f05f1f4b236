//! Ping-pong triangle visibility bitmaps for two-pass occlusion culling. The
//! first pass reads last frame's bitmap while the second writes this frame's.

use lume_core::{BufferDescriptor, BufferUsage, Device, LumeResult};

use crate::streaming::resident::PageStrides;

pub struct TriangleVisibility<D: Device> {
    buffers: [D::Buffer; 2],
    current: usize,
}

impl<D: Device> TriangleVisibility<D> {
    /// u32 words per bitmap.
    pub fn word_count(strides: PageStrides, loadable_pages: u32) -> u64 {
        strides.index as u64 * loadable_pages as u64 / 96
    }

    pub fn new(device: &D, strides: PageStrides, loadable_pages: u32) -> LumeResult<Self> {
        let descriptor = BufferDescriptor {
            size: Self::word_count(strides, loadable_pages).max(1) * 4,
            usage: BufferUsage::STORAGE,
            mapped_at_creation: false,
        };
        Ok(Self {
            buffers: [device.create_buffer(descriptor)?, device.create_buffer(descriptor)?],
            current: 0,
        })
    }

    /// Bitmap written this frame.
    pub fn current(&self) -> &D::Buffer {
        &self.buffers[self.current]
    }

    /// Bitmap written last frame.
    pub fn previous(&self) -> &D::Buffer {
        &self.buffers[1 - self.current]
    }

    pub fn index(&self) -> usize {
        self.current
    }

    pub fn swap(&mut self) {
        self.current = (self.current + 1) % 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lume_core::headless::HeadlessDevice;
    use lume_core::Buffer;

    #[test]
    fn test_ping_pong() {
        let device = HeadlessDevice::new();
        let strides = PageStrides { vertex: 1, index: 960, group: 4, instance: 4 };
        let mut vis = TriangleVisibility::new(&device, strides, 2).unwrap();
        assert_eq!(vis.current().size(), 20 * 4);

        vis.current().write_data(0, &[1, 0, 0, 0]).unwrap();
        vis.swap();
        assert_eq!(vis.index(), 1);
        assert_eq!(vis.previous().contents().unwrap()[0], 1);
        assert_eq!(vis.current().contents().unwrap()[0], 0);
        vis.swap();
        assert_eq!(vis.index(), 0);
    }
}
