use crate::mem::{AccessError, Region, SharedMemory};

/// Access width of a single bus transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Width {
    Byte = 1,
    Half = 2,
    Word = 4,
}

impl Width {
    pub const fn bytes(self) -> usize {
        self as usize
    }
}

/// Translates a console address into a packed offset.
///
/// The first region whose address range contains `addr` wins. The whole
/// `width`-byte access must stay inside that region's reserved span; anything
/// else is a bad access.
pub fn map(addr: u32, width: Width) -> Result<usize, AccessError> {
    let region = Region::containing(addr).ok_or(AccessError::BadAddress { addr })?;
    let offset = (addr - region.start()) as usize;
    crate::mem::check_span(region, offset, width.bytes())?;
    Ok(region.base() + offset)
}

pub trait BusAccess {
    fn read32(&self, addr: u32) -> Result<u32, AccessError>;
    fn read16(&self, addr: u32) -> Result<u16, AccessError>;
    fn read8(&self, addr: u32) -> Result<u8, AccessError>;
    fn write32(&self, addr: u32, value: u32) -> Result<(), AccessError>;
    fn write16(&self, addr: u32, value: u16) -> Result<(), AccessError>;
    fn write8(&self, addr: u32, value: u8) -> Result<(), AccessError>;
}

/// Typed view of the shared memory image through the console address map.
#[derive(Clone)]
pub struct Bus {
    pub mem: SharedMemory,
}

impl Bus {
    pub fn new(mem: SharedMemory) -> Self {
        Self { mem }
    }

    fn load<const N: usize>(&self, addr: u32, width: Width) -> Result<[u8; N], AccessError> {
        let offset = map(addr, width)?;
        self.mem.load::<N>(offset).ok_or(AccessError::BadAddress { addr })
    }

    fn store(&self, addr: u32, width: Width, data: &[u8]) -> Result<(), AccessError> {
        let offset = map(addr, width)?;
        #[cfg(feature = "trace_bus")]
        log::trace!("write {:#010x} <- {:02x?}", addr, data);
        self.mem.store(offset, data).ok_or(AccessError::BadAddress { addr })
    }
}

impl BusAccess for Bus {
    fn read32(&self, addr: u32) -> Result<u32, AccessError> {
        self.load::<4>(addr, Width::Word).map(u32::from_le_bytes)
    }
    fn read16(&self, addr: u32) -> Result<u16, AccessError> {
        self.load::<2>(addr, Width::Half).map(u16::from_le_bytes)
    }
    fn read8(&self, addr: u32) -> Result<u8, AccessError> {
        self.load::<1>(addr, Width::Byte).map(|[b]| b)
    }
    fn write32(&self, addr: u32, value: u32) -> Result<(), AccessError> {
        self.store(addr, Width::Word, &value.to_le_bytes())
    }
    fn write16(&self, addr: u32, value: u16) -> Result<(), AccessError> {
        self.store(addr, Width::Half, &value.to_le_bytes())
    }
    fn write8(&self, addr: u32, value: u8) -> Result<(), AccessError> {
        self.store(addr, Width::Byte, &[value])
    }
}
