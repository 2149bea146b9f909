// test_harness.rs
// In-memory stand-in for the packed memory image, limited to the three
// regions the translator reads (VRAM, palette RAM, OAM). Allocating the real
// image costs ~96 MiB per test, so translator tests build scenes here.

use std::sync::{Arc, Mutex};

use crate::io::RegisterSnapshot;
use crate::mem::{AccessError, Region, RegionAccess, check_span};
use crate::ppu::regs::{Background, BackgroundControl, DisplayControl, ObjAttributes, OamTable};

pub const OBJ_PALETTE_OFFSET: usize = 0x200;
pub const OBJ_TILE_OFFSET: usize = 0xC000;

#[derive(Clone)]
pub struct MockVideoMemory {
    pub vram: Arc<Mutex<Vec<u8>>>,
    pub palette: Arc<Mutex<Vec<u8>>>,
    pub oam: Arc<Mutex<Vec<u8>>>,
}

impl MockVideoMemory {
    pub fn new() -> Self {
        Self {
            vram: Arc::new(Mutex::new(vec![0u8; Region::Vram.size()])),
            palette: Arc::new(Mutex::new(vec![0u8; Region::Palette.size()])),
            oam: Arc::new(Mutex::new(vec![0u8; Region::Oam.size()])),
        }
    }

    fn bank(&self, region: Region) -> Option<&Arc<Mutex<Vec<u8>>>> {
        match region {
            Region::Vram => Some(&self.vram),
            Region::Palette => Some(&self.palette),
            Region::Oam => Some(&self.oam),
            _ => None,
        }
    }

    pub fn write_vram(&self, addr: usize, data: &[u8]) {
        let mut v = self.vram.lock().unwrap();
        v[addr..addr + data.len()].copy_from_slice(data);
    }

    /// Background palette bank, `index` in entries.
    pub fn write_palette(&self, index: usize, colors: &[u16]) {
        self.write_palette_bytes(index * 2, colors);
    }

    /// Object palette bank, `index` in entries.
    pub fn write_obj_palette(&self, index: usize, colors: &[u16]) {
        self.write_palette_bytes(OBJ_PALETTE_OFFSET + index * 2, colors);
    }

    fn write_palette_bytes(&self, offset: usize, colors: &[u16]) {
        let mut p = self.palette.lock().unwrap();
        for (i, c) in colors.iter().enumerate() {
            p[offset + i * 2..offset + i * 2 + 2].copy_from_slice(&c.to_le_bytes());
        }
    }

    pub fn write_oam(&self, slot: usize, entry: &ObjAttributes) {
        OamTable::store_slot(self, slot, entry).unwrap();
    }

    /// Fills one 64-byte 8bpp tile with a single palette index.
    pub fn fill_tile_8bpp(&self, char_base: usize, tile: usize, palette_index: u8) {
        self.write_vram(char_base + tile * 64, &[palette_index; 64]);
    }

    /// Fills one 64-byte 8bpp object tile (32-byte tile units) with a
    /// single palette index.
    pub fn fill_obj_tile_8bpp(&self, tile: usize, palette_index: u8) {
        self.write_vram(OBJ_TILE_OFFSET + tile * 32, &[palette_index; 64]);
    }

    /// Writes `count` identical screen entries starting at `screen_base`.
    pub fn fill_screen_block(&self, screen_base: usize, count: usize, entry: u16) {
        let bytes: Vec<u8> = std::iter::repeat(entry.to_le_bytes()).take(count).flatten().collect();
        self.write_vram(screen_base, &bytes);
    }

    pub fn oam_table(&self) -> OamTable {
        OamTable::capture(self).unwrap()
    }
}

impl RegionAccess for MockVideoMemory {
    fn region_read8(&self, region: Region, offset: usize) -> Result<u8, AccessError> {
        check_span(region, offset, 1)?;
        let bank = self.bank(region).ok_or(AccessError::BadAddress { addr: region.start() })?;
        Ok(bank.lock().unwrap()[offset])
    }

    fn region_write8(&self, region: Region, offset: usize, value: u8) -> Result<(), AccessError> {
        check_span(region, offset, 1)?;
        let bank = self.bank(region).ok_or(AccessError::BadAddress { addr: region.start() })?;
        bank.lock().unwrap()[offset] = value;
        Ok(())
    }
}

/// Mode 0, 1D object mapping, nothing enabled.
pub fn mode0_registers() -> RegisterSnapshot {
    let mut dispcnt = DisplayControl::default();
    dispcnt.set_one_dimensional(true);
    RegisterSnapshot {
        dispcnt,
        backgrounds: [Background::default(); 4],
    }
}

/// 8bpp text control word with the given blocks and size code.
pub fn bg_8bpp(char_block: u8, screen_block: u8, size: u8) -> BackgroundControl {
    let mut cnt = BackgroundControl::default();
    cnt.set_8bpp(true);
    cnt.set_char_block(char_block);
    cnt.set_screen_block(screen_block);
    cnt.set_size(size);
    cnt
}

/// 8bpp normal-mode object.
pub fn obj_8bpp(x: u16, y: u16, shape: u8, size: u8, tile: u16) -> ObjAttributes {
    let mut obj = ObjAttributes::new(x, y, shape, size, tile);
    obj.set_8bpp(true);
    obj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_rejects_regions_it_does_not_model() {
        let mem = MockVideoMemory::new();
        assert!(mem.region_read8(Region::Bios, 0).is_err());
        assert!(mem.region_read8(Region::Vram, Region::Vram.size()).is_err());
    }

    #[test]
    fn palette_helpers_target_their_banks() {
        let mem = MockVideoMemory::new();
        mem.write_palette(1, &[0x1234]);
        mem.write_obj_palette(1, &[0xABCD]);
        assert_eq!(mem.region_read16(Region::Palette, 2).unwrap(), 0x1234);
        assert_eq!(mem.region_read16(Region::Palette, 0x202).unwrap(), 0xABCD);
    }

    #[test]
    fn screen_block_fill_is_little_endian() {
        let mem = MockVideoMemory::new();
        mem.fill_screen_block(0x800, 2, 0x0102);
        let v = mem.vram.lock().unwrap();
        assert_eq!(&v[0x800..0x804], &[0x02, 0x01, 0x02, 0x01]);
    }
}
