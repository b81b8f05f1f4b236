use lume_core::{Buffer, BufferDescriptor, BufferUsage, Device, LumeResult};

use crate::format::{BakeMetadata, PageHeader};
use crate::processor::types::{CLUSTER_DATA_WORDS, GROUP_DATA_WORDS, PAGE_MAX_INSTANCES};
use crate::streaming::visibility::TriangleVisibility;

pub const STRIDE_CONSTANT_COUNT: usize = 8;
pub const CAMERA_DISTANCE_CONSTANT: usize = 7;
pub const FEEDBACK_WORDS: u64 = 256;
/// Words per page in the page-data buffer: packed bounds and instance count.
pub const PAGE_DATA_WORDS: usize = 4;
pub const EMPTY_SLOT: u32 = u32::MAX;

/// Per-slot sizes of each resident stream, in u32 values.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PageStrides {
    /// Position words; attributes take twice as many.
    pub vertex: u32,
    pub index: u32,
    pub group: u32,
    pub instance: u32,
}

impl PageStrides {
    pub fn from_metadata(meta: &BakeMetadata) -> Self {
        Self {
            vertex: meta.max_vertex_value_count,
            index: meta.max_index_value_count,
            group: meta.max_group_count * GROUP_DATA_WORDS as u32,
            instance: CLUSTER_DATA_WORDS as u32 * PAGE_MAX_INSTANCES,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.vertex != 0 && self.index != 0 && self.group != 0 && self.instance != 0
    }

    pub fn attribute(&self) -> u32 {
        self.vertex * 2
    }

    // Upload layout: positions | attributes | indices | groups | instances
    pub fn attribute_offset(&self) -> usize {
        self.vertex as usize
    }

    pub fn index_offset(&self) -> usize {
        self.vertex as usize * 3
    }

    pub fn group_offset(&self) -> usize {
        self.index_offset() + self.index as usize
    }

    pub fn instance_offset(&self) -> usize {
        self.group_offset() + self.group as usize
    }

    pub fn upload_words(&self) -> usize {
        self.instance_offset() + self.instance as usize
    }

    /// Whether a page's contents fit one slot.
    pub fn fits(&self, header: &PageHeader) -> bool {
        header.vertex_value_count <= self.vertex
            && header.index_value_count <= self.index
            && header.group_count as usize * GROUP_DATA_WORDS <= self.group as usize
            && header.instance_count as usize * CLUSTER_DATA_WORDS <= self.instance as usize
    }
}

fn create<D: Device>(device: &D, words: u64, usage: BufferUsage) -> LumeResult<D::Buffer> {
    device.create_buffer(BufferDescriptor { size: words.max(1) * 4, usage, mapped_at_creation: false })
}

/// GPU buffers holding the loaded pages, addressed as `slot * stride`.
pub struct ResidentBuffers<D: Device> {
    pub strides: PageStrides,
    pub loadable_pages: u32,
    pub page_count: u32,

    pub positions: D::Buffer,
    pub attributes: D::Buffer,
    pub indices: D::Buffer,
    pub groups: D::Buffer,
    pub instances: D::Buffer,
    pub visibility: TriangleVisibility<D>,
    pub triangle_data: D::Buffer,
    pub shadow_triangle_data: D::Buffer,

    pub feedback: D::Buffer,
    /// Resident page id per slot, `EMPTY_SLOT` when free.
    pub page_status: D::Buffer,
    pub page_data: D::Buffer,
    pub stride_constants: D::Buffer,
    pub dispatch_args: D::Buffer,
}

impl<D: Device> ResidentBuffers<D> {
    pub fn new(
        device: &D,
        strides: PageStrides,
        page_count: u32,
        loadable_pages: u32,
        camera_load_distance: f32,
    ) -> LumeResult<Self> {
        let l = loadable_pages as u64;
        let storage = BufferUsage::STORAGE | BufferUsage::COPY_DST;
        let triangle_words = PAGE_MAX_INSTANCES as u64 * l * 3;

        let page_status = create(device, l, storage)?;
        page_status.write_data(0, bytemuck::cast_slice(&vec![EMPTY_SLOT; loadable_pages as usize]))?;

        let stride_constants = create(device, STRIDE_CONSTANT_COUNT as u64, BufferUsage::UNIFORM | BufferUsage::COPY_DST)?;
        let constants: [u32; STRIDE_CONSTANT_COUNT] = [
            strides.vertex,
            strides.index,
            strides.group / GROUP_DATA_WORDS as u32,
            loadable_pages,
            PAGE_MAX_INSTANCES * loadable_pages,
            page_count,
            TriangleVisibility::<D>::word_count(strides, loadable_pages) as u32 / 4,
            camera_load_distance.to_bits(),
        ];
        stride_constants.write_data(0, bytemuck::cast_slice(&constants))?;

        // 两个 dispatch: (x, 1, 1)
        let dispatch_args = create(device, 6, BufferUsage::INDIRECT | BufferUsage::STORAGE | BufferUsage::COPY_DST)?;
        dispatch_args.write_data(0, bytemuck::cast_slice(&[0u32, 1, 1, 0, 1, 1]))?;

        Ok(Self {
            strides,
            loadable_pages,
            page_count,
            positions: create(device, strides.vertex as u64 * l, storage)?,
            attributes: create(device, strides.attribute() as u64 * l, storage)?,
            indices: create(device, strides.index as u64 * l, storage)?,
            groups: create(device, strides.group as u64 * l, storage)?,
            instances: create(device, strides.instance as u64 * l, storage)?,
            visibility: TriangleVisibility::new(device, strides, loadable_pages)?,
            triangle_data: create(device, triangle_words, BufferUsage::STORAGE)?,
            shadow_triangle_data: create(device, triangle_words, BufferUsage::STORAGE)?,
            feedback: create(device, FEEDBACK_WORDS, BufferUsage::STORAGE | BufferUsage::COPY_SRC)?,
            page_status,
            page_data: create(device, page_count as u64 * PAGE_DATA_WORDS as u64, storage)?,
            stride_constants,
            dispatch_args,
        })
    }

    pub fn set_camera_load_distance(&self, distance: f32) -> LumeResult<()> {
        self.stride_constants
            .write_data(CAMERA_DISTANCE_CONSTANT as u64 * 4, &distance.to_bits().to_le_bytes())
    }

    /// Writes the resident page id of a slot.
    pub fn set_slot_page(&self, slot: usize, page: Option<u32>) -> LumeResult<()> {
        self.page_status
            .write_data(slot as u64 * 4, &page.unwrap_or(EMPTY_SLOT).to_le_bytes())
    }

    /// Fills the page-data buffer from the page headers.
    pub fn write_page_data(&self, headers: &[PageHeader]) -> LumeResult<()> {
        let mut words = vec![0u32; self.page_count as usize * PAGE_DATA_WORDS];
        for (i, header) in headers.iter().take(self.page_count as usize).enumerate() {
            if header.instance_count > 65536 {
                log::error!("page {} reports {} instances, more than the culling pass addresses", i, header.instance_count);
            }
            let w = &mut words[i * PAGE_DATA_WORDS..(i + 1) * PAGE_DATA_WORDS];
            w[..3].copy_from_slice(&header.bounds);
            w[3] = header.instance_count;
        }
        self.page_data.write_data(0, bytemuck::cast_slice(&words))
    }

    /// Copies a filled upload buffer into every stream at `slot`.
    pub fn copy_from_upload(&self, device: &D, upload: &D::Buffer, slot: usize) -> LumeResult<()> {
        let s = self.strides;
        let slot = slot as u64;
        let copies = [
            (0, &self.positions, s.vertex),
            (s.attribute_offset(), &self.attributes, s.attribute()),
            (s.index_offset(), &self.indices, s.index),
            (s.group_offset(), &self.groups, s.group),
            (s.instance_offset(), &self.instances, s.instance),
        ];
        for (source_offset, destination, stride) in copies {
            let bytes = stride as u64 * 4;
            device.copy_buffer_to_buffer(upload, source_offset as u64 * 4, destination, slot * bytes, bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lume_core::headless::HeadlessDevice;

    fn strides() -> PageStrides {
        PageStrides { vertex: 10, index: 6, group: 8, instance: 4 * PAGE_MAX_INSTANCES }
    }

    #[test]
    fn test_upload_layout() {
        let s = strides();
        assert_eq!(s.attribute_offset(), 10);
        assert_eq!(s.index_offset(), 30);
        assert_eq!(s.group_offset(), 36);
        assert_eq!(s.instance_offset(), 44);
        assert_eq!(s.upload_words(), 44 + 6400);
        assert!(!PageStrides { vertex: 0, ..s }.is_valid());
    }

    #[test]
    fn test_buffer_sizes_and_constants() {
        let device = HeadlessDevice::new();
        let buffers = ResidentBuffers::new(&device, strides(), 32, 4, 20.0).unwrap();
        assert_eq!(buffers.positions.size(), 10 * 4 * 4);
        assert_eq!(buffers.attributes.size(), 20 * 4 * 4);
        assert_eq!(buffers.page_data.size(), 32 * 4 * 4);
        assert_eq!(buffers.page_status.contents().unwrap(), vec![0xff; 16]);

        buffers.set_camera_load_distance(35.0).unwrap();
        let mut constants = [0u32; 8];
        buffers.stride_constants.read_data(0, bytemuck::cast_slice_mut(&mut constants)).unwrap();
        assert_eq!(&constants[..6], &[10, 6, 2, 4, 6400, 32]);
        assert_eq!(f32::from_bits(constants[7]), 35.0);
    }

    #[test]
    fn test_copy_lands_at_slot_offset() {
        let device = HeadlessDevice::new();
        let s = strides();
        let buffers = ResidentBuffers::new(&device, s, 32, 4, 20.0).unwrap();
        let upload = create(&device, s.upload_words() as u64, BufferUsage::COPY_SRC).unwrap();
        let mut staging = vec![0u32; s.upload_words()];
        staging[s.index_offset()] = 0xabcd;
        staging[s.group_offset() + 7] = 42;
        upload.write_data(0, bytemuck::cast_slice(&staging)).unwrap();

        buffers.copy_from_upload(&device, &upload, 2).unwrap();
        let mut word = [0u32; 1];
        buffers.indices.read_data(2 * 6 * 4, bytemuck::cast_slice_mut(&mut word)).unwrap();
        assert_eq!(word[0], 0xabcd);
        buffers.groups.read_data((2 * 8 + 7) * 4, bytemuck::cast_slice_mut(&mut word)).unwrap();
        assert_eq!(word[0], 42);
    }
}
