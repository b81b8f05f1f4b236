//! Per-page feedback word written by the GPU culling pass.
//!
//! bit 0: too far, bits 1..19: page index, bits 20..31: requested LOD level.

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub lod_level: u32,
    pub too_far: bool,
}

impl PageRequest {
    pub fn decode(word: u32) -> Self {
        Self {
            page: (word & 0xfffff) >> 1,
            lod_level: word >> 20,
            too_far: word & 1 == 1,
        }
    }

    pub fn encode(&self) -> u32 {
        self.lod_level << 20 | (self.page << 1 & 0xfffff) | self.too_far as u32
    }
}
