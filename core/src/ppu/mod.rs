//! GBA PPU frame translator.
//!
//! Instead of rasterizing scanlines, each frame is expanded into GPU draw
//! data: every enabled background layer and every visible object becomes one
//! sprite record, and every decoded source pixel becomes one pixel record
//! plus one unit quad in the index buffer. The renderer then issues one
//! instanced draw per sprite, in emission order, so later sprites paint over
//! earlier ones.
//!
//! Only video mode 0 with 8bpp tiles and 1D object mapping is translated.
//! Everything else is reported as [`Unimplemented`] rather than drawn wrong.

pub mod output;
pub mod regs;
#[cfg(test)]
pub(crate) mod test_harness;

pub use self::output::{BufferCapacity, FrameOutput};

use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::io::RegisterSnapshot;
use crate::mem::{AccessError, Region, RegionAccess};
use crate::video::gba_to_gpu_color;

use self::output::{BufferKind, Depth, Overflow, PixelAttributes, QUAD_INDICES, SpriteAttributes};
use self::regs::{Background, DecodeError, DisplayControl, ObjAttributes, ObjMode, OamTable};

const TILE_PIXELS: usize = 64;
/// Object tile data starts here inside VRAM.
pub const OBJ_TILE_BASE: usize = 0xC000;
/// Hardware object tile numbers count 32-byte units, whatever the color
/// depth.
pub const OBJ_TILE_UNIT: usize = 32;
/// Object palette bank offset inside palette RAM.
pub const OBJ_PALETTE_BASE: usize = 0x200;

/// Where a sprite record came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Background(usize),
    Object(usize),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Background(layer) => write!(f, "BG{}", layer),
            Source::Object(slot) => write!(f, "OBJ{}", slot),
        }
    }
}

/// Hardware features reached at runtime that the translator does not
/// emulate.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unimplemented {
    #[error("video mode {0}")]
    VideoMode(u8),
    #[error("4 bits-per-pixel tiles")]
    FourBitsPerPixel,
    #[error("2D object tile mapping")]
    TwoDimensionalMapping,
    #[error("affine objects")]
    AffineObject,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PpuError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("{entry}: {error}")]
    Decode {
        entry: Source,
        #[source]
        error: DecodeError,
    },
    #[error("unimplemented: {feature}")]
    Unimplemented {
        entry: Option<Source>,
        feature: Unimplemented,
    },
    #[error("{buffer:?} buffer exceeded its capacity of {capacity} entries")]
    CapacityExceeded { buffer: BufferKind, capacity: usize },
}

impl From<Overflow> for PpuError {
    fn from(o: Overflow) -> Self {
        PpuError::CapacityExceeded {
            buffer: o.buffer,
            capacity: o.capacity,
        }
    }
}

impl PpuError {
    /// Errors confined to one background layer or object slot. Only these
    /// can be skipped under [`ErrorPolicy::Lenient`].
    pub fn entry(&self) -> Option<Source> {
        match self {
            PpuError::Decode { entry, .. } => Some(*entry),
            PpuError::Unimplemented { entry, .. } => *entry,
            _ => None,
        }
    }

    fn unimplemented(entry: Source, feature: Unimplemented) -> Self {
        PpuError::Unimplemented {
            entry: Some(entry),
            feature,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Any error aborts the frame.
    #[default]
    Strict,
    /// Malformed or unsupported entries are skipped; the rest of the frame
    /// is still produced.
    Lenient,
}

/// How an object's x/y attribute fields become a screen origin.
///
/// Hardware treats them as 9-bit and 8-bit two's complement values. Some
/// renderer builds read the masked fields as plain unsigned numbers; which
/// one the consuming renderer expects is still to be confirmed against real
/// hardware output, so both are selectable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjOrigin {
    #[default]
    SignExtended,
    Masked,
}

/// How tile numbers in screen entries and object attributes become VRAM
/// offsets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileAddressing {
    /// The tile number is a byte offset from the character base (or from
    /// [`OBJ_TILE_BASE`] for objects). This is what existing renderer builds
    /// consume.
    #[default]
    Raw,
    /// Background tile numbers count 64-byte 8bpp tiles and object tile
    /// numbers count [`OBJ_TILE_UNIT`]-byte units, as the hardware does.
    HardwareUnits,
}

impl TileAddressing {
    fn background_offset(self, tile: u16) -> usize {
        match self {
            TileAddressing::Raw => tile as usize,
            TileAddressing::HardwareUnits => tile as usize * TILE_PIXELS,
        }
    }

    fn object_offset(self, tile: u16) -> usize {
        match self {
            TileAddressing::Raw => tile as usize,
            TileAddressing::HardwareUnits => tile as usize * OBJ_TILE_UNIT,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateOptions {
    pub policy: ErrorPolicy,
    pub obj_origin: ObjOrigin,
    pub tile_addressing: TileAddressing,
    pub capacity: BufferCapacity,
}

fn sign_extend(value: u16, bits: u32) -> i16 {
    let shift = 16 - bits;
    ((value << shift) as i16) >> shift
}

/// Translator state: the reusable output buffers.
pub struct Ppu {
    options: TranslateOptions,
    output: FrameOutput,
    ready: bool,
}

impl Ppu {
    pub fn new() -> Self {
        Self::with_options(TranslateOptions::default())
    }

    pub fn with_options(options: TranslateOptions) -> Self {
        Ppu {
            options,
            output: FrameOutput::new(options.capacity),
            ready: false,
        }
    }

    /// The last successfully translated frame. `None` after a failed
    /// translation, so a partial frame is never handed out.
    pub fn frame(&self) -> Option<&FrameOutput> {
        self.ready.then_some(&self.output)
    }

    /// Hands the last translated frame over in exchange for `spare`, which
    /// the next translation writes into. Returns false, leaving `spare`
    /// untouched, when there is no completed frame.
    pub fn swap_frame(&mut self, spare: &mut FrameOutput) -> bool {
        if !self.ready {
            return false;
        }
        std::mem::swap(&mut self.output, spare);
        self.ready = false;
        true
    }

    /// Rebuilds every output buffer from the snapshot and video memory.
    pub fn translate<M: RegionAccess>(
        &mut self,
        mem: &M,
        regs: &RegisterSnapshot,
        oam: &OamTable,
    ) -> Result<&FrameOutput, PpuError> {
        self.ready = false;
        self.output.clear();

        match regs.dispcnt.mode() {
            0 => self.translate_mode0(mem, regs, oam)?,
            mode => {
                return Err(PpuError::Unimplemented {
                    entry: None,
                    feature: Unimplemented::VideoMode(mode),
                });
            }
        }

        debug!(
            "translated {} sprites, {} pixels, {} indices",
            self.output.metadata.num_sprites,
            self.output.pixels.len(),
            self.output.indices.len()
        );
        self.ready = true;
        Ok(&self.output)
    }

    fn translate_mode0<M: RegionAccess>(
        &mut self,
        mem: &M,
        regs: &RegisterSnapshot,
        oam: &OamTable,
    ) -> Result<(), PpuError> {
        for (layer, bg) in regs.backgrounds.iter().enumerate() {
            if !regs.dispcnt.bg_enabled(layer) {
                continue;
            }
            let result = self.emit_background(mem, layer, bg);
            self.settle(result)?;
        }

        if !regs.dispcnt.obj_enabled() {
            return Ok(());
        }
        for (slot, obj) in oam.entries.iter().enumerate() {
            if obj.is_empty() || obj.mode() == ObjMode::Hidden {
                continue;
            }
            let result = self.emit_object(mem, regs.dispcnt, slot, obj);
            self.settle(result)?;
        }
        Ok(())
    }

    fn settle(&self, result: Result<(), PpuError>) -> Result<(), PpuError> {
        match result {
            Err(err) if self.options.policy == ErrorPolicy::Lenient && err.entry().is_some() => {
                warn!("skipping {}", err);
                Ok(())
            }
            other => other,
        }
    }

    fn emit_background<M: RegionAccess>(&mut self, mem: &M, layer: usize, bg: &Background) -> Result<(), PpuError> {
        let entry = Source::Background(layer);
        if !bg.control.is_8bpp() {
            return Err(PpuError::unimplemented(entry, Unimplemented::FourBitsPerPixel));
        }

        let (tiles_width, tiles_height) = bg.control.text_tiles();
        let num_tiles = tiles_width as usize * tiles_height as usize;
        let (sprite_id, start) = self.begin_sprite(
            SpriteAttributes {
                offset_x: -(bg.hofs.offset() as i16),
                offset_y: -(bg.vofs.offset() as i16),
                depth: Depth::Background as u16,
                tiles_width,
                tiles_height,
            },
            num_tiles * TILE_PIXELS,
        )?;

        let char_base = bg.control.char_base();
        let screen_base = bg.control.screen_base();
        #[cfg(feature = "trace_ppu")]
        log::trace!(
            "{}: {}x{} tiles, char base {:#06x}, screen base {:#06x}",
            entry,
            tiles_width,
            tiles_height,
            char_base,
            screen_base
        );

        for cell in 0..num_tiles {
            let screen_entry = mem.region_read16(Region::Vram, screen_base + cell * 2)?;
            let tile_base = char_base + self.options.tile_addressing.background_offset(screen_entry & 0x1FF);
            for i in 0..TILE_PIXELS {
                let palette_index = mem.region_read8(Region::Vram, tile_base + i)? as usize;
                let color = mem.region_read16(Region::Palette, palette_index * 2)?;
                self.emit_pixel(color, sprite_id, start)?;
            }
        }
        Ok(())
    }

    fn emit_object<M: RegionAccess>(
        &mut self,
        mem: &M,
        dispcnt: DisplayControl,
        slot: usize,
        obj: &ObjAttributes,
    ) -> Result<(), PpuError> {
        let entry = Source::Object(slot);
        if matches!(obj.mode(), ObjMode::Affine | ObjMode::AffineDouble) {
            return Err(PpuError::unimplemented(entry, Unimplemented::AffineObject));
        }
        let (tiles_width, tiles_height) = obj.tiles().map_err(|error| PpuError::Decode { entry, error })?;
        if !obj.is_8bpp() {
            return Err(PpuError::unimplemented(entry, Unimplemented::FourBitsPerPixel));
        }
        if !dispcnt.one_dimensional() {
            return Err(PpuError::unimplemented(entry, Unimplemented::TwoDimensionalMapping));
        }

        let bits_per_pixel = 8;
        let bytes_to_process = tiles_width as usize * tiles_height as usize * 8 * bits_per_pixel;
        let (offset_x, offset_y) = match self.options.obj_origin {
            ObjOrigin::SignExtended => (sign_extend(obj.x(), 9), sign_extend(obj.y(), 8)),
            ObjOrigin::Masked => (obj.x() as i16, obj.y() as i16),
        };
        let (sprite_id, start) = self.begin_sprite(
            SpriteAttributes {
                offset_x,
                offset_y,
                depth: Depth::Sprite as u16,
                tiles_width,
                tiles_height,
            },
            bytes_to_process,
        )?;

        let tile_base = OBJ_TILE_BASE + self.options.tile_addressing.object_offset(obj.tile());
        #[cfg(feature = "trace_ppu")]
        log::trace!("{}: {}x{} tiles at ({}, {}), tile data {:#07x}", entry, tiles_width, tiles_height, offset_x, offset_y, tile_base);

        for i in 0..bytes_to_process {
            let palette_index = mem.region_read8(Region::Vram, tile_base + i)? as usize;
            let color = mem.region_read16(Region::Palette, OBJ_PALETTE_BASE + palette_index * 2)?;
            self.emit_pixel(color, sprite_id, start)?;
        }
        Ok(())
    }

    /// Records a sprite and its manifest entry. Returns the sprite id and the
    /// pixel-stream offset its pixels start at.
    fn begin_sprite(&mut self, sprite: SpriteAttributes, pixels: usize) -> Result<(u32, u32), PpuError> {
        let sprite_id = self.output.metadata.num_sprites as u32;
        self.output.sprites.push(sprite)?;
        self.output
            .metadata
            .push(self.output.indices.len() * std::mem::size_of::<u16>(), pixels);
        Ok((sprite_id, self.output.pixels.len() as u32))
    }

    fn emit_pixel(&mut self, gba_color: u16, sprite_id: u32, start: u32) -> Result<(), PpuError> {
        self.output.pixels.push(PixelAttributes {
            color: gba_to_gpu_color(gba_color),
            sprite_attribute: sprite_id,
            pixel_buffer_start_offset: start,
        })?;
        self.output.indices.extend_from_slice(&QUAD_INDICES)?;
        Ok(())
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}
