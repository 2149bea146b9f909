//! Color conversion and a software stand-in for the GPU draw pass.
//!
//! [`Rasterizer`] consumes a translated frame exactly the way the instanced
//! renderer does: one draw per manifest entry, in order, each pixel record
//! covering one screen pixel. It exists so frames can be inspected without a
//! GPU (headless runs, the desktop preview, tests).

use std::io::{self, Write};

use crate::ppu::output::{Depth, FrameOutput, SpriteAttributes};

pub const GBA_SCREEN_W: usize = 240;
pub const GBA_SCREEN_H: usize = 160;

const TILE_SIDE: usize = 8;
const TILE_PIXELS: usize = TILE_SIDE * TILE_SIDE;

/// 15-bit palette color, read as `0rrrrrgggggbbbbb`, to the renderer's packed
/// `0xRRGGBBAA` word.
///
/// Channels scale by 256/32, so full intensity is 248, and alpha is left at
/// zero.
pub fn gba_to_gpu_color(gba: u16) -> u32 {
    let r = ((gba >> 10) & 0x1F) as u32 * 256 / 32;
    let g = ((gba >> 5) & 0x1F) as u32 * 256 / 32;
    let b = (gba & 0x1F) as u32 * 256 / 32;
    (r << 24) | (g << 16) | (b << 8)
}

/// Packed GPU color to RGBA bytes. Alpha is forced opaque because the
/// packed word never carries one.
pub fn gpu_color_to_rgba(color: u32) -> [u8; 4] {
    let [r, g, b, _] = color.to_be_bytes();
    [r, g, b, 0xFF]
}

/// Screen position of the `local`-th pixel of a sprite, before clipping.
fn pixel_position(sprite: &SpriteAttributes, local: usize) -> (i32, i32) {
    let tile = local / TILE_PIXELS;
    let within = local % TILE_PIXELS;
    let width = sprite.tiles_width.max(1) as usize;
    let tx = tile % width;
    let ty = tile / width;
    (
        sprite.offset_x as i32 + (tx * TILE_SIDE + within % TILE_SIDE) as i32,
        sprite.offset_y as i32 + (ty * TILE_SIDE + within / TILE_SIDE) as i32,
    )
}

pub struct Rasterizer {
    rgba: Vec<u8>,
}

impl Rasterizer {
    pub fn new() -> Self {
        Self {
            rgba: vec![0u8; GBA_SCREEN_W * GBA_SCREEN_H * 4],
        }
    }

    pub fn framebuffer(&self) -> &[u8] {
        &self.rgba
    }

    fn clear(&mut self) {
        for px in self.rgba.chunks_exact_mut(4) {
            px.copy_from_slice(&[0, 0, 0, 0xFF]);
        }
    }

    /// Paints every draw of `frame`. Text backgrounds wrap around their
    /// layer size like the hardware; objects are clipped at the screen edge.
    pub fn render(&mut self, frame: &FrameOutput) -> &[u8] {
        self.clear();
        let pixels = frame.pixels.as_slice();
        let sprites = frame.sprites.as_slice();

        for (_, count, base) in frame.metadata.draws() {
            let Some(records) = pixels.get(base..base + count) else {
                log::warn!("draw at {} runs past the pixel stream ({})", base, pixels.len());
                break;
            };
            for (local, record) in records.iter().enumerate() {
                let Some(sprite) = sprites.get(record.sprite_attribute as usize) else {
                    continue;
                };
                let (mut x, mut y) = pixel_position(sprite, local);
                if sprite.depth == Depth::Background as u16 {
                    let layer_w = sprite.tiles_width as i32 * TILE_SIDE as i32;
                    let layer_h = sprite.tiles_height as i32 * TILE_SIDE as i32;
                    if layer_w > 0 && layer_h > 0 {
                        x = x.rem_euclid(layer_w);
                        y = y.rem_euclid(layer_h);
                    }
                }
                if x < 0 || y < 0 || x >= GBA_SCREEN_W as i32 || y >= GBA_SCREEN_H as i32 {
                    continue;
                }
                let o = (y as usize * GBA_SCREEN_W + x as usize) * 4;
                self.rgba[o..o + 4].copy_from_slice(&gpu_color_to_rgba(record.color));
            }
        }
        &self.rgba
    }
}

impl Default for Rasterizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Binary PPM (P6) of an RGBA framebuffer; alpha is dropped.
pub fn write_ppm<W: Write>(out: &mut W, rgba: &[u8], width: usize, height: usize) -> io::Result<()> {
    if rgba.len() != width * height * 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} bytes is not a {}x{} RGBA image", rgba.len(), width, height),
        ));
    }
    write!(out, "P6\n{} {}\n255\n", width, height)?;
    let rgb: Vec<u8> = rgba.chunks_exact(4).flat_map(|px| [px[0], px[1], px[2]]).collect();
    out.write_all(&rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ppu::output::{BufferCapacity, PixelAttributes, QUAD_INDICES};

    #[test]
    fn color_conversion_is_exact() {
        assert_eq!(gba_to_gpu_color(0x7FFF), 0xF8F8_F800);
        assert_eq!(gba_to_gpu_color(0x7C00), 0xF800_0000);
        assert_eq!(gba_to_gpu_color(0x03E0), 0x00F8_0000);
        assert_eq!(gba_to_gpu_color(0x001F), 0x0000_F800);
        assert_eq!(gba_to_gpu_color(0x0000), 0);
        // Bit 15 is ignored.
        assert_eq!(gba_to_gpu_color(0xFFFF), 0xF8F8_F800);
        assert_eq!(gba_to_gpu_color(0x0421), 0x0808_0800);
    }

    #[test]
    fn rgba_unpacking_forces_alpha() {
        assert_eq!(gpu_color_to_rgba(0xF800_0000), [0xF8, 0, 0, 0xFF]);
        assert_eq!(gpu_color_to_rgba(0x1020_3000), [0x10, 0x20, 0x30, 0xFF]);
    }

    fn push_sprite(frame: &mut FrameOutput, sprite: SpriteAttributes, colors: &[u32]) {
        let id = frame.sprites.len() as u32;
        let start = frame.pixels.len() as u32;
        frame.sprites.push(sprite).unwrap();
        frame.metadata.push(frame.indices.len() * 2, colors.len());
        for &color in colors {
            frame
                .pixels
                .push(PixelAttributes {
                    color,
                    sprite_attribute: id,
                    pixel_buffer_start_offset: start,
                })
                .unwrap();
            frame.indices.extend_from_slice(&QUAD_INDICES).unwrap();
        }
    }

    fn pixel(fb: &[u8], x: usize, y: usize) -> [u8; 4] {
        let o = (y * GBA_SCREEN_W + x) * 4;
        [fb[o], fb[o + 1], fb[o + 2], fb[o + 3]]
    }

    #[test]
    fn tiles_are_laid_out_row_major() {
        let mut frame = FrameOutput::new(BufferCapacity::default());
        let mut colors = vec![0xF800_0000; 64];
        colors.extend(vec![0x00F8_0000; 64]);
        colors[9] = 0x0000_F800;
        push_sprite(
            &mut frame,
            SpriteAttributes {
                offset_x: 100,
                offset_y: 50,
                depth: Depth::Sprite as u16,
                tiles_width: 2,
                tiles_height: 1,
            },
            &colors,
        );

        let mut raster = Rasterizer::new();
        let fb = raster.render(&frame).to_vec();
        assert_eq!(pixel(&fb, 100, 50), [0xF8, 0, 0, 0xFF]);
        assert_eq!(pixel(&fb, 101, 51), [0, 0, 0xF8, 0xFF]);
        assert_eq!(pixel(&fb, 108, 50), [0, 0xF8, 0, 0xFF]);
        assert_eq!(pixel(&fb, 115, 57), [0, 0xF8, 0, 0xFF]);
        assert_eq!(pixel(&fb, 116, 50), [0, 0, 0, 0xFF]);
    }

    #[test]
    fn later_draws_paint_over_earlier_ones() {
        let mut frame = FrameOutput::new(BufferCapacity::default());
        let sprite = SpriteAttributes {
            offset_x: 0,
            offset_y: 0,
            depth: Depth::Sprite as u16,
            tiles_width: 1,
            tiles_height: 1,
        };
        push_sprite(&mut frame, sprite, &[0xF800_0000; 64]);
        push_sprite(&mut frame, SpriteAttributes { offset_x: 4, ..sprite }, &[0x00F8_0000; 64]);

        let mut raster = Rasterizer::new();
        let fb = raster.render(&frame).to_vec();
        assert_eq!(pixel(&fb, 3, 0), [0xF8, 0, 0, 0xFF]);
        assert_eq!(pixel(&fb, 4, 0), [0, 0xF8, 0, 0xFF]);
    }

    #[test]
    fn objects_clip_and_backgrounds_wrap() {
        let mut frame = FrameOutput::new(BufferCapacity::default());
        push_sprite(
            &mut frame,
            SpriteAttributes {
                offset_x: -8,
                offset_y: -8,
                depth: Depth::Background as u16,
                tiles_width: 32,
                tiles_height: 32,
            },
            &vec![0x0000_F800; 1024 * 64],
        );
        push_sprite(
            &mut frame,
            SpriteAttributes {
                offset_x: -4,
                offset_y: 156,
                depth: Depth::Sprite as u16,
                tiles_width: 1,
                tiles_height: 1,
            },
            &[0xF8F8_F800; 64],
        );

        let mut raster = Rasterizer::new();
        let fb = raster.render(&frame).to_vec();
        assert_eq!(pixel(&fb, 239, 159), [0, 0, 0xF8, 0xFF]);
        assert_eq!(pixel(&fb, 0, 156), [0xF8, 0xF8, 0xF8, 0xFF]);
        assert_eq!(pixel(&fb, 3, 159), [0xF8, 0xF8, 0xF8, 0xFF]);
        assert_eq!(pixel(&fb, 4, 159), [0, 0, 0xF8, 0xFF]);
    }

    #[test]
    fn ppm_has_header_and_rgb_payload() {
        let rgba = [1, 2, 3, 255, 4, 5, 6, 255];
        let mut out = Vec::new();
        write_ppm(&mut out, &rgba, 2, 1).unwrap();
        assert_eq!(&out[..11], b"P6\n2 1\n255\n");
        assert_eq!(&out[11..], &[1, 2, 3, 4, 5, 6]);
        assert!(write_ppm(&mut Vec::new(), &rgba, 3, 1).is_err());
    }
}
