//! Packed backing store for the console address space.
//!
//! Every known address region is laid out back-to-back in one contiguous
//! buffer, in the order of [`Region::ALL`]. Each region reserves a fixed span
//! of bytes; for VRAM, palette RAM and OAM that span is larger than the range
//! of addresses the bus accepts, and the extra bytes are reachable through
//! [`RegionAccess`] only.
//!
//! The buffer is shared between the CPU thread and the render thread without
//! a lock. Bytes are stored as atomics so concurrent reads and writes are
//! well defined; a frame built while the CPU is writing may be torn, never
//! undefined.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;

pub const BIOS_SIZE: usize = 0x4000;
pub const WRAM_ONBOARD_SIZE: usize = 0x40000;
pub const WRAM_ONCHIP_SIZE: usize = 0x8000;
pub const IO_REGISTERS_SIZE: usize = 0x1FF;
pub const PALETTE_RAM_SIZE: usize = 0x400;
pub const VRAM_SIZE: usize = 0x18000;
pub const OAM_SIZE: usize = 0x400;
pub const GAMEPAK_WS_SIZE: usize = 0x200_0000;
pub const GAMEPAK_SRAM_SIZE: usize = 0x10000;
pub const EXTRA_SIZE: usize = 1;

pub const TOTAL_MEMORY_SIZE: usize = BIOS_SIZE
    + WRAM_ONBOARD_SIZE
    + WRAM_ONCHIP_SIZE
    + IO_REGISTERS_SIZE
    + PALETTE_RAM_SIZE
    + VRAM_SIZE
    + OAM_SIZE
    + 3 * GAMEPAK_WS_SIZE
    + GAMEPAK_SRAM_SIZE
    + EXTRA_SIZE;

/// One of the known address regions, in packing order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Region {
    Bios,
    WramOnBoard,
    WramOnChip,
    Io,
    Palette,
    Vram,
    Oam,
    GamePakWs0,
    GamePakWs1,
    GamePakWs2,
    GamePakSram,
    /// Singleton address 0x04000410, touched by software outside the
    /// documented map.
    Extra,
}

impl Region {
    pub const ALL: [Region; 12] = [
        Region::Bios,
        Region::WramOnBoard,
        Region::WramOnChip,
        Region::Io,
        Region::Palette,
        Region::Vram,
        Region::Oam,
        Region::GamePakWs0,
        Region::GamePakWs1,
        Region::GamePakWs2,
        Region::GamePakSram,
        Region::Extra,
    ];

    /// First bus address of the region.
    pub const fn start(self) -> u32 {
        match self {
            Region::Bios => 0x0000_0000,
            Region::WramOnBoard => 0x0200_0000,
            Region::WramOnChip => 0x0300_0000,
            Region::Io => 0x0400_0000,
            Region::Palette => 0x0500_0000,
            Region::Vram => 0x0600_0000,
            Region::Oam => 0x0700_0000,
            Region::GamePakWs0 => 0x0800_0000,
            Region::GamePakWs1 => 0x0A00_0000,
            Region::GamePakWs2 => 0x0C00_0000,
            Region::GamePakSram => 0x0E00_0000,
            Region::Extra => 0x0400_0410,
        }
    }

    /// Last bus address of the region (inclusive).
    pub const fn end(self) -> u32 {
        match self {
            Region::Bios => 0x0000_3FFF,
            Region::WramOnBoard => 0x0203_FFFF,
            Region::WramOnChip => 0x0300_7FFF,
            Region::Io => 0x0400_01FE,
            Region::Palette => 0x0500_01FF,
            Region::Vram => 0x0600_BFFF,
            Region::Oam => 0x0700_01FF,
            Region::GamePakWs0 => 0x09FF_FFFF,
            Region::GamePakWs1 => 0x0BFF_FFFF,
            Region::GamePakWs2 => 0x0DFF_FFFF,
            Region::GamePakSram => 0x0E00_FFFF,
            Region::Extra => 0x0400_0410,
        }
    }

    /// Bytes reserved for the region in the packed image.
    pub const fn size(self) -> usize {
        match self {
            Region::Bios => BIOS_SIZE,
            Region::WramOnBoard => WRAM_ONBOARD_SIZE,
            Region::WramOnChip => WRAM_ONCHIP_SIZE,
            Region::Io => IO_REGISTERS_SIZE,
            Region::Palette => PALETTE_RAM_SIZE,
            Region::Vram => VRAM_SIZE,
            Region::Oam => OAM_SIZE,
            Region::GamePakWs0 | Region::GamePakWs1 | Region::GamePakWs2 => GAMEPAK_WS_SIZE,
            Region::GamePakSram => GAMEPAK_SRAM_SIZE,
            Region::Extra => EXTRA_SIZE,
        }
    }

    /// Offset of the region's first byte in the packed image.
    pub const fn base(self) -> usize {
        let mut base = 0;
        let mut i = 0;
        while i < Region::ALL.len() {
            let r = Region::ALL[i];
            if r as usize == self as usize {
                break;
            }
            base += r.size();
            i += 1;
        }
        base
    }

    pub const fn contains(self, addr: u32) -> bool {
        addr >= self.start() && addr <= self.end()
    }

    /// First region in packing order whose address range holds `addr`.
    pub fn containing(addr: u32) -> Option<Region> {
        Region::ALL.into_iter().find(|r| r.contains(addr))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("bad access: address {addr:#010x} is outside every known region")]
    BadAddress { addr: u32 },
    #[error("bad access: {width}-byte access at offset {offset:#x} overruns {region:?} ({size:#x} bytes)")]
    OutOfRegion {
        region: Region,
        offset: usize,
        width: usize,
        size: usize,
    },
    #[error("image of {len} bytes does not fit the {capacity}-byte memory image")]
    ImageTooLarge { len: usize, capacity: usize },
}

/// Reads and writes addressed by region plus an offset inside that region's
/// reserved span.
pub trait RegionAccess {
    fn region_read8(&self, region: Region, offset: usize) -> Result<u8, AccessError>;

    fn region_write8(&self, region: Region, offset: usize, value: u8) -> Result<(), AccessError>;

    fn region_read16(&self, region: Region, offset: usize) -> Result<u16, AccessError> {
        check_span(region, offset, 2)?;
        let lo = self.region_read8(region, offset)? as u16;
        let hi = self.region_read8(region, offset + 1)? as u16;
        Ok(lo | (hi << 8))
    }

    fn region_write16(&self, region: Region, offset: usize, value: u16) -> Result<(), AccessError> {
        check_span(region, offset, 2)?;
        self.region_write8(region, offset, value as u8)?;
        self.region_write8(region, offset + 1, (value >> 8) as u8)
    }
}

/// Fails unless `offset..offset + width` lies inside the region's span.
pub fn check_span(region: Region, offset: usize, width: usize) -> Result<(), AccessError> {
    if offset.checked_add(width).is_some_and(|end| end <= region.size()) {
        Ok(())
    } else {
        Err(AccessError::OutOfRegion {
            region,
            offset,
            width,
            size: region.size(),
        })
    }
}

const DUMP_CHUNK: usize = 64 * 1024;

/// The whole console address space, packed.
pub struct MemoryImage {
    bytes: Box<[AtomicU8]>,
}

/// Handle passed between the CPU thread and the render thread.
pub type SharedMemory = Arc<MemoryImage>;

impl MemoryImage {
    pub fn new() -> Self {
        let bytes = std::iter::repeat_with(|| AtomicU8::new(0))
            .take(TOTAL_MEMORY_SIZE)
            .collect();
        Self { bytes }
    }

    pub fn shared() -> SharedMemory {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reads `N` bytes at a packed offset, little-endian order preserved.
    pub(crate) fn load<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let src = self.bytes.get(offset..offset.checked_add(N)?)?;
        let mut out = [0u8; N];
        for (dst, b) in out.iter_mut().zip(src) {
            *dst = b.load(Ordering::Relaxed);
        }
        Some(out)
    }

    pub(crate) fn store(&self, offset: usize, data: &[u8]) -> Option<()> {
        let dst = self.bytes.get(offset..offset.checked_add(data.len())?)?;
        for (b, &v) in dst.iter().zip(data) {
            b.store(v, Ordering::Relaxed);
        }
        Some(())
    }

    /// Copies `data` into the image starting at packed offset 0.
    ///
    /// Used to restore a full-image dump; fails if `data` is larger than the
    /// image.
    pub fn load_packed(&self, data: &[u8]) -> Result<(), AccessError> {
        self.store(0, data).ok_or(AccessError::ImageTooLarge {
            len: data.len(),
            capacity: TOTAL_MEMORY_SIZE,
        })
    }

    /// Copies `data` into a region starting at `offset`.
    pub fn fill_region(&self, region: Region, offset: usize, data: &[u8]) -> Result<(), AccessError> {
        check_span(region, offset, data.len())?;
        self.store(region.base() + offset, data).ok_or(AccessError::OutOfRegion {
            region,
            offset,
            width: data.len(),
            size: region.size(),
        })
    }

    /// Dumps the whole packed image in the layout [`Self::load_packed`]
    /// restores.
    pub fn write_to<W: std::io::Write>(&self, out: &mut W) -> std::io::Result<()> {
        for block in self.bytes.chunks(DUMP_CHUNK) {
            let buf: Vec<u8> = block.iter().map(|b| b.load(Ordering::Relaxed)).collect();
            out.write_all(&buf)?;
        }
        Ok(())
    }
}

impl Default for MemoryImage {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionAccess for MemoryImage {
    fn region_read8(&self, region: Region, offset: usize) -> Result<u8, AccessError> {
        check_span(region, offset, 1)?;
        Ok(self.bytes[region.base() + offset].load(Ordering::Relaxed))
    }

    fn region_write8(&self, region: Region, offset: usize, value: u8) -> Result<(), AccessError> {
        check_span(region, offset, 1)?;
        self.bytes[region.base() + offset].store(value, Ordering::Relaxed);
        Ok(())
    }
}
