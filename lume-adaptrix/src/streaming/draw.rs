use bytemuck::{Pod, Zeroable};
use lume_core::{Buffer, BufferDescriptor, BufferUsage, Device, LumeResult};

/// Indexed indirect draw arguments, laid out as the GPU consumes them.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectDrawIndexedArgs {
    pub index_count_per_instance: u32,
    pub instance_count: u32,
    pub start_index: u32,
    pub base_vertex_index: u32,
    pub start_instance: u32,
}

/// Per-material and shadow draw arguments over the compacted index buffer.
/// The culling pass fills in the index counts.
pub struct DrawResources<D: Device> {
    pub draw_args: D::Buffer,
    pub shadow_draw_args: D::Buffer,
    /// One opaque region plus one per shadow cascade, each `index_stride * loadable_pages` long.
    pub compacted_indices: D::Buffer,
    pub material_count: usize,
    pub cascade_count: u32,
    region_indices: u32,
}

fn args_buffer<D: Device>(device: &D, args: &[IndirectDrawIndexedArgs]) -> LumeResult<D::Buffer> {
    let buffer = device.create_buffer(BufferDescriptor {
        size: (args.len().max(1) * std::mem::size_of::<IndirectDrawIndexedArgs>()) as u64,
        usage: BufferUsage::INDIRECT | BufferUsage::STORAGE | BufferUsage::COPY_DST,
        mapped_at_creation: true,
    })?;
    buffer.write_data(0, bytemuck::cast_slice(args))?;
    Ok(buffer)
}

impl<D: Device> DrawResources<D> {
    pub fn new(device: &D, material_count: usize, index_stride: u32, loadable_pages: u32, cascade_count: u32) -> LumeResult<Self> {
        let draw_args = args_buffer(
            device,
            &vec![IndirectDrawIndexedArgs { instance_count: 1, ..Default::default() }; material_count],
        )?;
        let region_indices = index_stride * loadable_pages;
        let (compacted_indices, shadow_draw_args) = Self::shadow_buffers(device, region_indices, cascade_count)?;
        Ok(Self {
            draw_args,
            shadow_draw_args,
            compacted_indices,
            material_count,
            cascade_count,
            region_indices,
        })
    }

    fn shadow_buffers(device: &D, region_indices: u32, cascade_count: u32) -> LumeResult<(D::Buffer, D::Buffer)> {
        let compacted = device.create_buffer(BufferDescriptor {
            size: ((cascade_count as u64 + 1) * region_indices as u64).max(1) * 4,
            usage: BufferUsage::INDEX | BufferUsage::STORAGE,
            mapped_at_creation: false,
        })?;
        let args: Vec<IndirectDrawIndexedArgs> = (0..cascade_count)
            .map(|c| IndirectDrawIndexedArgs {
                instance_count: 1,
                start_index: (c + 1) * region_indices,
                ..Default::default()
            })
            .collect();
        Ok((compacted, args_buffer(device, &args)?))
    }

    /// Reallocates the compacted index buffer and shadow args for a new cascade count.
    pub fn set_cascade_count(&mut self, device: &D, cascade_count: u32) -> LumeResult<()> {
        if cascade_count == self.cascade_count {
            return Ok(());
        }
        let (compacted, args) = Self::shadow_buffers(device, self.region_indices, cascade_count)?;
        self.compacted_indices = compacted;
        self.shadow_draw_args = args;
        self.cascade_count = cascade_count;
        Ok(())
    }

    /// Byte offset of a material's args in `draw_args`.
    pub fn args_offset(material: usize) -> u64 {
        (material * std::mem::size_of::<IndirectDrawIndexedArgs>()) as u64
    }
}
