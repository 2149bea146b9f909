//! The CPU side of the display core.
//!
//! A runner owns the shared memory image, fills it from some program source
//! and keeps mutating it on its own thread. It learns when video memory may
//! be written from the [`VBlankGate`]; the display side never calls into it
//! beyond [`CpuRunner::init`] and [`CpuRunner::run`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, info};
use thiserror::Error;

use crate::bus::Bus;
use crate::io::RegisterSnapshot;
use crate::mem::{AccessError, MemoryImage, Region, RegionAccess, SharedMemory};
use crate::ppu::{OBJ_PALETTE_BASE, OBJ_TILE_BASE};
use crate::ppu::regs::{BackgroundControl, DisplayControl, ObjAttributes, ObjMode, OamTable};
use crate::timing::VBlankGate;
use crate::video::GBA_SCREEN_W;

const IDLE_POLL: Duration = Duration::from_millis(1);

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("usage: expected {expected} arguments, got {got}")]
    Usage { expected: usize, got: usize },
    #[error("reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Memory(#[from] AccessError),
}

/// CPU-emulation collaborator contract.
pub trait CpuRunner: Send {
    /// Loads the program named by `argv`. Fails if `argv` is malformed.
    fn init(&mut self, argv: &[String]) -> Result<(), RunnerError>;

    /// Runs until `stop` is raised. Expected to be called on its own thread.
    fn run(&mut self, gate: &VBlankGate, stop: &AtomicBool) -> Result<(), RunnerError>;

    fn memory(&self) -> SharedMemory;

    fn name(&self) -> &'static str;
}

/// Restores a packed memory dump and leaves it untouched.
pub struct SnapshotRunner {
    mem: SharedMemory,
    path: Option<PathBuf>,
}

impl SnapshotRunner {
    pub fn new() -> Self {
        Self::with_memory(MemoryImage::shared())
    }

    pub fn with_memory(mem: SharedMemory) -> Self {
        Self { mem, path: None }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

impl Default for SnapshotRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuRunner for SnapshotRunner {
    /// `argv` is `[program, dump path]`.
    fn init(&mut self, argv: &[String]) -> Result<(), RunnerError> {
        let [_, path] = argv else {
            return Err(RunnerError::Usage {
                expected: 2,
                got: argv.len(),
            });
        };
        let path = PathBuf::from(path);
        let data = std::fs::read(&path).map_err(|source| RunnerError::Io {
            path: path.clone(),
            source,
        })?;
        self.mem.load_packed(&data)?;
        info!("loaded {} byte memory image from {}", data.len(), path.display());
        self.path = Some(path);
        Ok(())
    }

    fn run(&mut self, _gate: &VBlankGate, stop: &AtomicBool) -> Result<(), RunnerError> {
        while !stop.load(Ordering::Acquire) {
            thread::sleep(IDLE_POLL * 10);
        }
        Ok(())
    }

    fn memory(&self) -> SharedMemory {
        self.mem.clone()
    }

    fn name(&self) -> &'static str {
        "snapshot"
    }
}

/// One 8bpp tile: palette index 1 body, index 2 eyes, index 0 around.
#[rustfmt::skip]
const INVADER: [u8; 64] = [
    0, 0, 1, 1, 1, 1, 0, 0,
    0, 1, 1, 1, 1, 1, 1, 0,
    1, 1, 2, 1, 1, 2, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1,
    0, 1, 0, 1, 0, 1, 0, 1,
    0, 1, 0, 1, 0, 1, 0, 1,
    0, 1, 0, 1, 0, 1, 0, 1,
    0, 0, 0, 0, 0, 0, 0, 0,
];

const BACKDROP: u16 = 0x001F;
const OBJ_COLORS: [u16; 3] = [0xFF00, 0x00FF, 0x7FFF];
const DEMO_SLOTS: usize = 2;
const OAM_ENTRIES: usize = 128;

/// Built-in scene: a plain background and two invaders marching across it.
///
/// Video memory is only written while the vblank window is open, one step
/// per window.
pub struct DemoRunner {
    bus: Bus,
    step: u16,
}

impl DemoRunner {
    pub fn new() -> Self {
        Self::with_memory(MemoryImage::shared())
    }

    pub fn with_memory(mem: SharedMemory) -> Self {
        Self { bus: Bus::new(mem), step: 0 }
    }

    fn invader(&self, slot: usize) -> ObjAttributes {
        let x = match slot {
            0 => self.step % GBA_SCREEN_W as u16,
            _ => (GBA_SCREEN_W as u16 - 16) - self.step % (GBA_SCREEN_W as u16 - 16),
        };
        let y = 1 + 0x1F * slot as u16;
        let mut obj = ObjAttributes::new(x, y, 0b00, 0b01, 0);
        obj.set_8bpp(true);
        obj
    }

    fn build_scene(&self) -> Result<(), AccessError> {
        let mut dispcnt = DisplayControl::default();
        dispcnt.set_one_dimensional(true);
        dispcnt.set_bg_enabled(0, true);
        dispcnt.set_obj_enabled(true);
        let mut bg0 = BackgroundControl::default();
        bg0.set_8bpp(true);
        let mut regs = RegisterSnapshot {
            dispcnt,
            ..Default::default()
        };
        regs.backgrounds[0].control = bg0;
        regs.store(&self.bus)?;

        let mem = &*self.bus.mem;
        mem.fill_region(Region::Vram, OBJ_TILE_BASE, &INVADER)?;
        mem.region_write16(Region::Palette, 0, BACKDROP)?;
        for (i, color) in OBJ_COLORS.iter().enumerate() {
            mem.region_write16(Region::Palette, OBJ_PALETTE_BASE + i * 2, *color)?;
        }

        let mut hidden = ObjAttributes::default();
        hidden.set_mode(ObjMode::Hidden);
        for slot in DEMO_SLOTS..OAM_ENTRIES {
            OamTable::store_slot(mem, slot, &hidden)?;
        }
        self.place_invaders()
    }

    fn place_invaders(&self) -> Result<(), AccessError> {
        for slot in 0..DEMO_SLOTS {
            OamTable::store_slot(&*self.bus.mem, slot, &self.invader(slot))?;
        }
        Ok(())
    }

    /// Advances the animation by one frame.
    pub fn advance(&mut self) -> Result<(), AccessError> {
        self.step = self.step.wrapping_add(1);
        self.place_invaders()
    }
}

impl Default for DemoRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuRunner for DemoRunner {
    /// `argv` is just `[program]`.
    fn init(&mut self, argv: &[String]) -> Result<(), RunnerError> {
        if argv.len() != 1 {
            return Err(RunnerError::Usage {
                expected: 1,
                got: argv.len(),
            });
        }
        self.step = 0;
        self.build_scene()?;
        info!("demo scene ready");
        Ok(())
    }

    fn run(&mut self, gate: &VBlankGate, stop: &AtomicBool) -> Result<(), RunnerError> {
        // A window already open at startup has not been handled yet.
        let mut last_window = if gate.is_open() {
            gate.frame().wrapping_sub(1)
        } else {
            gate.frame()
        };
        while gate.wait_open(stop, IDLE_POLL) {
            let window = gate.frame();
            if window != last_window {
                self.advance()?;
                last_window = window;
                debug!("demo step {} in window {}", self.step, window);
            }
            thread::sleep(IDLE_POLL);
        }
        Ok(())
    }

    fn memory(&self) -> SharedMemory {
        self.bus.mem.clone()
    }

    fn name(&self) -> &'static str {
        "demo"
    }
}
