//! GPU-facing records and the bounded buffers a frame is written into.

use serde::{Deserialize, Serialize};

/// Two triangles covering one unit quad, emitted once per pixel.
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// Layering tag of a sprite record. It does not affect paint order, which
/// is manifest order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Depth {
    Sprite = 0,
    Background = 1,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct PixelAttributes {
    pub color: u32,
    /// Emission index of the owning sprite.
    pub sprite_attribute: u32,
    /// Index of the owning sprite's first record in the pixel stream.
    pub pixel_buffer_start_offset: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SpriteAttributes {
    /// Screen-space origin, (0, 0) is the top-left corner.
    pub offset_x: i16,
    pub offset_y: i16,
    pub depth: u16,
    pub tiles_width: u16,
    pub tiles_height: u16,
}

/// Draw manifest: one entry per emitted sprite, in paint order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpriteMetadata {
    pub num_sprites: usize,
    /// Byte offset of the sprite's first index.
    pub index_buffer_offset: Vec<usize>,
    pub num_pixels: Vec<usize>,
}

impl SpriteMetadata {
    pub fn clear(&mut self) {
        self.num_sprites = 0;
        self.index_buffer_offset.clear();
        self.num_pixels.clear();
    }

    pub fn push(&mut self, index_byte_offset: usize, pixels: usize) {
        self.num_sprites += 1;
        self.index_buffer_offset.push(index_byte_offset);
        self.num_pixels.push(pixels);
    }

    pub fn total_pixels(&self) -> usize {
        self.num_pixels.iter().sum()
    }

    /// `(index byte offset, instance count, base instance)` per draw call.
    pub fn draws(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        self.index_buffer_offset
            .iter()
            .zip(&self.num_pixels)
            .scan(0usize, |base, (&offset, &count)| {
                let draw = (offset, count, *base);
                *base += count;
                Some(draw)
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Index,
    PixelAttributes,
    SpriteAttributes,
}

/// Element capacities of the three output buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferCapacity {
    pub indices: usize,
    pub pixels: usize,
    pub sprites: usize,
}

pub const MAX_PIXELS: usize = 1024 * 1024;
pub const MAX_SPRITES: usize = 4 + super::regs::OAM_SLOTS;

impl Default for BufferCapacity {
    fn default() -> Self {
        Self {
            indices: MAX_PIXELS * QUAD_INDICES.len(),
            pixels: MAX_PIXELS,
            sprites: MAX_SPRITES,
        }
    }
}

/// Vec with a hard element limit. Pushing past it fails instead of growing.
#[derive(Clone, Debug)]
pub struct BoundedBuffer<T> {
    items: Vec<T>,
    capacity: usize,
    kind: BufferKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Overflow {
    pub buffer: BufferKind,
    pub capacity: usize,
}

impl<T: Copy> BoundedBuffer<T> {
    pub fn new(kind: BufferKind, capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            capacity,
            kind,
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn push(&mut self, item: T) -> Result<(), Overflow> {
        self.extend_from_slice(std::slice::from_ref(&item))
    }

    pub fn extend_from_slice(&mut self, items: &[T]) -> Result<(), Overflow> {
        if self.items.len() + items.len() > self.capacity {
            return Err(Overflow {
                buffer: self.kind,
                capacity: self.capacity,
            });
        }
        self.items.extend_from_slice(items);
        Ok(())
    }
}

pub type IndexBuffer = BoundedBuffer<u16>;
pub type PixelAttributeBuffer = BoundedBuffer<PixelAttributes>;
pub type SpriteAttributeBuffer = BoundedBuffer<SpriteAttributes>;

/// Everything the renderer needs for one frame.
#[derive(Clone, Debug)]
pub struct FrameOutput {
    pub metadata: SpriteMetadata,
    pub indices: IndexBuffer,
    pub pixels: PixelAttributeBuffer,
    pub sprites: SpriteAttributeBuffer,
}

impl FrameOutput {
    pub fn new(capacity: BufferCapacity) -> Self {
        Self {
            metadata: SpriteMetadata::default(),
            indices: IndexBuffer::new(BufferKind::Index, capacity.indices),
            pixels: PixelAttributeBuffer::new(BufferKind::PixelAttributes, capacity.pixels),
            sprites: SpriteAttributeBuffer::new(BufferKind::SpriteAttributes, capacity.sprites),
        }
    }

    pub fn clear(&mut self) {
        self.metadata.clear();
        self.indices.clear();
        self.pixels.clear();
        self.sprites.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_buffer_refuses_to_grow_past_capacity() {
        let mut buf = IndexBuffer::new(BufferKind::Index, 8);
        buf.extend_from_slice(&QUAD_INDICES).unwrap();
        assert_eq!(
            buf.extend_from_slice(&QUAD_INDICES),
            Err(Overflow { buffer: BufferKind::Index, capacity: 8 })
        );
        assert_eq!(buf.len(), 6, "rejected write leaves contents untouched");
        buf.push(7).unwrap();
        buf.push(7).unwrap();
        assert!(buf.push(7).is_err());
    }

    #[test]
    fn draws_carry_running_instance_base() {
        let mut meta = SpriteMetadata::default();
        meta.push(0, 64);
        meta.push(64 * 12, 128);
        meta.push(192 * 12, 4096);
        let draws: Vec<_> = meta.draws().collect();
        assert_eq!(draws, vec![(0, 64, 0), (768, 128, 64), (2304, 4096, 192)]);
        assert_eq!(meta.total_pixels(), 64 + 128 + 4096);
    }

    #[test]
    fn default_capacity_fits_four_large_layers() {
        let cap = BufferCapacity::default();
        assert_eq!(cap.pixels, 4 * 64 * 64 * 64);
        assert_eq!(cap.indices, cap.pixels * 6);
        assert_eq!(cap.sprites, 260);
    }
}
