//! Bit-field views over raw PPU registers and object attributes.

use thiserror::Error;

use crate::mem::{AccessError, Region, RegionAccess};

/// Object attribute slots walked per frame.
pub const OAM_SLOTS: usize = 256;
const OAM_ENTRY_BYTES: usize = 8;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid sprite shape/size combination: shape {shape:#04b}, size {size:#04b}")]
    InvalidSpriteShape { shape: u8, size: u8 },
}

macro_rules! field {
    ($get:ident, $set:ident, $shift:expr, $mask:expr) => {
        pub fn $get(&self) -> u8 {
            ((self.0 >> $shift) & $mask) as u8
        }

        pub fn $set(&mut self, value: u8) {
            self.0 = (self.0 & !($mask << $shift)) | ((value as u16 & $mask) << $shift);
        }
    };
}

macro_rules! flag {
    ($get:ident, $set:ident, $bit:expr) => {
        pub fn $get(&self) -> bool {
            self.0 & (1 << $bit) != 0
        }

        pub fn $set(&mut self, on: bool) {
            if on {
                self.0 |= 1 << $bit;
            } else {
                self.0 &= !(1 << $bit);
            }
        }
    };
}

/// DISPCNT.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisplayControl(pub u16);

impl DisplayControl {
    field!(mode, set_mode, 0, 0b111);
    // Set = 1D object tile mapping.
    flag!(one_dimensional, set_one_dimensional, 6);
    flag!(obj_enabled, set_obj_enabled, 12);

    pub fn bg_enabled(&self, layer: usize) -> bool {
        self.0 & (1 << (8 + layer)) != 0
    }

    pub fn set_bg_enabled(&mut self, layer: usize, on: bool) {
        let bit = 1u16 << (8 + layer);
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

/// BGxCNT.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackgroundControl(pub u16);

impl BackgroundControl {
    // Priority: 0 = highest, 3 = lowest.
    field!(priority, set_priority, 0, 0b11);
    field!(char_block, set_char_block, 2, 0b11);
    flag!(mosaic, set_mosaic, 4);
    // Clear = 4bpp (16 colors), set = 8bpp (256 colors).
    flag!(is_8bpp, set_8bpp, 5);
    field!(screen_block, set_screen_block, 8, 0b1_1111);
    // Wrap only matters for affine layers.
    flag!(wrap, set_wrap, 13);
    field!(size, set_size, 14, 0b11);

    /// Tile grid (width, height) of a text-mode layer.
    pub fn text_tiles(&self) -> (u16, u16) {
        text_background_tiles(self.size())
    }

    pub fn char_base(&self) -> usize {
        self.char_block() as usize * 0x4000
    }

    pub fn screen_base(&self) -> usize {
        self.screen_block() as usize * 0x800
    }
}

/// BGxHOFS / BGxVOFS. Only the low 9 bits are significant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackgroundOffset(pub u16);

impl BackgroundOffset {
    pub fn offset(&self) -> u16 {
        self.0 & 0x1FF
    }

    pub fn set_offset(&mut self, value: u16) {
        self.0 = (self.0 & !0x1FF) | (value & 0x1FF);
    }
}

/// Registers of one background layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Background {
    pub control: BackgroundControl,
    pub hofs: BackgroundOffset,
    pub vofs: BackgroundOffset,
}

pub fn text_background_tiles(size: u8) -> (u16, u16) {
    match size & 0b11 {
        0b00 => (32, 32),
        0b01 => (64, 32),
        0b10 => (32, 64),
        _ => (64, 64),
    }
}

/// Tile grid (width, height) of an object.
pub fn sprite_tiles(shape: u8, size: u8) -> Result<(u16, u16), DecodeError> {
    let tiles = match (shape, size) {
        (0b00, 0b00) => (1, 1),
        (0b01, 0b00) => (2, 1),
        (0b10, 0b00) => (1, 2),

        (0b00, 0b01) => (2, 2),
        (0b01, 0b01) => (4, 1),
        (0b10, 0b01) => (1, 4),

        (0b00, 0b10) => (4, 4),
        (0b01, 0b10) => (4, 2),
        (0b10, 0b10) => (2, 4),

        (0b00, 0b11) => (8, 8),
        (0b01, 0b11) => (8, 4),
        (0b10, 0b11) => (4, 8),

        _ => return Err(DecodeError::InvalidSpriteShape { shape, size }),
    };
    Ok(tiles)
}

/// Rendering mode bits of attr0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjMode {
    Normal,
    Affine,
    Hidden,
    AffineDouble,
}

/// One OAM slot: attr0, attr1, attr2 and the affine filler halfword.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ObjAttributes {
    pub attr0: u16,
    pub attr1: u16,
    pub attr2: u16,
    pub fill: u16,
}

impl ObjAttributes {
    pub fn new(x: u16, y: u16, shape: u8, size: u8, tile: u16) -> Self {
        Self {
            attr0: ((shape as u16 & 0b11) << 14) | (y & 0xFF),
            attr1: ((size as u16 & 0b11) << 14) | (x & 0x1FF),
            attr2: tile & 0x3FF,
            fill: 0,
        }
    }

    pub fn y(&self) -> u16 {
        self.attr0 & 0xFF
    }

    pub fn x(&self) -> u16 {
        self.attr1 & 0x1FF
    }

    pub fn mode(&self) -> ObjMode {
        match (self.attr0 >> 8) & 0b11 {
            0b00 => ObjMode::Normal,
            0b01 => ObjMode::Affine,
            0b10 => ObjMode::Hidden,
            _ => ObjMode::AffineDouble,
        }
    }

    pub fn set_mode(&mut self, mode: ObjMode) {
        let bits = match mode {
            ObjMode::Normal => 0b00,
            ObjMode::Affine => 0b01,
            ObjMode::Hidden => 0b10,
            ObjMode::AffineDouble => 0b11,
        };
        self.attr0 = (self.attr0 & !(0b11 << 8)) | (bits << 8);
    }

    pub fn mosaic(&self) -> bool {
        self.attr0 & (1 << 12) != 0
    }

    pub fn is_8bpp(&self) -> bool {
        self.attr0 & (1 << 13) != 0
    }

    pub fn set_8bpp(&mut self, on: bool) {
        if on {
            self.attr0 |= 1 << 13;
        } else {
            self.attr0 &= !(1 << 13);
        }
    }

    pub fn shape(&self) -> u8 {
        (self.attr0 >> 14) as u8
    }

    pub fn size(&self) -> u8 {
        (self.attr1 >> 14) as u8
    }

    pub fn tile(&self) -> u16 {
        self.attr2 & 0x3FF
    }

    /// Both position words zero: an unused slot.
    pub fn is_empty(&self) -> bool {
        self.attr0 == 0 && self.attr1 == 0
    }

    pub fn tiles(&self) -> Result<(u16, u16), DecodeError> {
        sprite_tiles(self.shape(), self.size())
    }
}

/// Copy of the whole object attribute table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OamTable {
    pub entries: [ObjAttributes; OAM_SLOTS],
}

impl Default for OamTable {
    fn default() -> Self {
        Self {
            entries: [ObjAttributes::default(); OAM_SLOTS],
        }
    }
}

impl OamTable {
    /// Reads every slot from OAM. Slots lying past the end of OAM read as
    /// empty.
    pub fn capture<M: RegionAccess>(mem: &M) -> Result<Self, AccessError> {
        let mut table = Self::default();
        for (slot, entry) in table.entries.iter_mut().enumerate() {
            let base = slot * OAM_ENTRY_BYTES;
            if base + OAM_ENTRY_BYTES > Region::Oam.size() {
                break;
            }
            *entry = ObjAttributes {
                attr0: mem.region_read16(Region::Oam, base)?,
                attr1: mem.region_read16(Region::Oam, base + 2)?,
                attr2: mem.region_read16(Region::Oam, base + 4)?,
                fill: mem.region_read16(Region::Oam, base + 6)?,
            };
        }
        Ok(table)
    }

    /// Writes one slot back to OAM.
    pub fn store_slot<M: RegionAccess>(mem: &M, slot: usize, entry: &ObjAttributes) -> Result<(), AccessError> {
        let base = slot * OAM_ENTRY_BYTES;
        mem.region_write16(Region::Oam, base, entry.attr0)?;
        mem.region_write16(Region::Oam, base + 2, entry.attr1)?;
        mem.region_write16(Region::Oam, base + 4, entry.attr2)?;
        mem.region_write16(Region::Oam, base + 6, entry.fill)
    }
}
