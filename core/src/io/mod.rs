use crate::bus::BusAccess;
use crate::mem::AccessError;
use crate::ppu::regs::{Background, BackgroundControl, BackgroundOffset, DisplayControl};

pub const REG_DISPCNT: u32 = 0x0400_0000;
pub const REG_VCOUNT: u32 = 0x0400_0006;
pub const REG_BG0CNT: u32 = 0x0400_0008;
pub const REG_BG0HOFS: u32 = 0x0400_0010;
pub const REG_BG0VOFS: u32 = 0x0400_0012;

/// First scanline of vertical blank.
pub const VBLANK_LINE: u16 = 160;

pub const fn bg_cnt(layer: usize) -> u32 {
    REG_BG0CNT + 2 * layer as u32
}

pub const fn bg_hofs(layer: usize) -> u32 {
    REG_BG0HOFS + 4 * layer as u32
}

pub const fn bg_vofs(layer: usize) -> u32 {
    REG_BG0VOFS + 4 * layer as u32
}

/// The display registers the translator consumes, copied out of the IO
/// region at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub dispcnt: DisplayControl,
    pub backgrounds: [Background; 4],
}

impl RegisterSnapshot {
    pub fn capture<B: BusAccess>(bus: &B) -> Result<Self, AccessError> {
        // DISPCNT is read as a word; the upper half is green swap.
        let dispcnt = DisplayControl(bus.read32(REG_DISPCNT)? as u16);
        let mut backgrounds = [Background::default(); 4];
        for (layer, bg) in backgrounds.iter_mut().enumerate() {
            *bg = Background {
                control: BackgroundControl(bus.read16(bg_cnt(layer))?),
                hofs: BackgroundOffset(bus.read16(bg_hofs(layer))?),
                vofs: BackgroundOffset(bus.read16(bg_vofs(layer))?),
            };
        }
        Ok(Self { dispcnt, backgrounds })
    }

    /// Writes the registers back, as a program would before a frame.
    pub fn store<B: BusAccess>(&self, bus: &B) -> Result<(), AccessError> {
        bus.write16(REG_DISPCNT, self.dispcnt.0)?;
        for (layer, bg) in self.backgrounds.iter().enumerate() {
            bus.write16(bg_cnt(layer), bg.control.0)?;
            bus.write16(bg_hofs(layer), bg.hofs.0)?;
            bus.write16(bg_vofs(layer), bg.vofs.0)?;
        }
        Ok(())
    }
}

pub fn write_vcount<B: BusAccess>(bus: &B, line: u16) -> Result<(), AccessError> {
    bus.write16(REG_VCOUNT, line)
}

pub fn read_vcount<B: BusAccess>(bus: &B) -> Result<u16, AccessError> {
    bus.read16(REG_VCOUNT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::mem::{MemoryImage, Region, RegionAccess};

    #[test]
    fn register_addresses() {
        assert_eq!(bg_cnt(3), 0x0400_000E);
        assert_eq!(bg_hofs(2), 0x0400_0018);
        assert_eq!(bg_vofs(3), 0x0400_001E);
    }

    #[test]
    fn snapshot_reads_what_the_program_wrote() {
        let bus = Bus::new(MemoryImage::shared());
        bus.write32(REG_DISPCNT, 0xFFFF_1140).unwrap();
        bus.write16(bg_cnt(2), 0x1F23).unwrap();
        bus.write16(bg_hofs(2), 0x0123).unwrap();
        bus.write16(bg_vofs(1), 0xFE07).unwrap();

        let regs = RegisterSnapshot::capture(&bus).unwrap();
        assert_eq!(regs.dispcnt.0, 0x1140);
        assert!(regs.dispcnt.one_dimensional());
        assert!(regs.dispcnt.obj_enabled());
        assert!(regs.dispcnt.bg_enabled(0));
        assert_eq!(regs.backgrounds[2].control.screen_block(), 0x1F);
        assert!(regs.backgrounds[2].control.is_8bpp());
        assert_eq!(regs.backgrounds[2].hofs.offset(), 0x123);
        assert_eq!(regs.backgrounds[1].vofs.offset(), 0x007);
        assert_eq!(regs.backgrounds[0], Background::default());
    }

    #[test]
    fn store_then_capture_is_stable() {
        let bus = Bus::new(MemoryImage::shared());
        let mut regs = RegisterSnapshot::default();
        regs.dispcnt.set_bg_enabled(3, true);
        regs.backgrounds[3].control.set_size(3);
        regs.backgrounds[3].hofs.set_offset(300);
        regs.store(&bus).unwrap();
        assert_eq!(RegisterSnapshot::capture(&bus).unwrap(), regs);
    }

    #[test]
    fn vcount_lands_in_io_region() {
        let bus = Bus::new(MemoryImage::shared());
        write_vcount(&bus, VBLANK_LINE).unwrap();
        assert_eq!(read_vcount(&bus).unwrap(), 160);
        assert_eq!(bus.mem.region_read16(Region::Io, 6).unwrap(), 160);
    }
}
