//! Frame synchronization between the CPU thread and the translator.
//!
//! Once per tick the loop advertises a vertical-blank window by writing the
//! first blanking line into VCOUNT, keeps it open for a fixed time, closes
//! it, then snapshots the display registers and OAM and translates a frame.
//! The CPU side may only touch video memory while the window is open; this
//! is advisory, so a late writer produces a torn frame, not a fault.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::io::{self, RegisterSnapshot, VBLANK_LINE};
use crate::log_buffer;
use crate::ppu::output::FrameOutput;
use crate::ppu::regs::OamTable;
use crate::ppu::{Ppu, PpuError, TranslateOptions};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Tick period; 16 667 us is roughly 60 Hz.
    pub frame_interval_us: u64,
    pub vblank_window_ms: u64,
    pub vblank_open_line: u16,
    pub vblank_close_line: u16,
    pub translate: TranslateOptions,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            frame_interval_us: 16_667,
            vblank_window_ms: 5,
            vblank_open_line: VBLANK_LINE,
            vblank_close_line: 0,
            translate: TranslateOptions::default(),
        }
    }
}

impl SyncConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(self.frame_interval_us)
    }

    pub fn vblank_window(&self) -> Duration {
        Duration::from_millis(self.vblank_window_ms)
    }
}

/// In-process mirror of the VCOUNT handshake, shared with the CPU runner.
#[derive(Debug, Default)]
pub struct VBlankGate {
    open: AtomicBool,
    /// Windows opened so far.
    frame: AtomicU64,
}

impl VBlankGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    pub fn open(&self) {
        self.frame.fetch_add(1, Ordering::AcqRel);
        self.open.store(true, Ordering::Release);
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Sleeps in `poll` steps until the window opens. Returns false if
    /// `stop` was raised first.
    pub fn wait_open(&self, stop: &AtomicBool, poll: Duration) -> bool {
        loop {
            if stop.load(Ordering::Acquire) {
                return false;
            }
            if self.is_open() {
                return true;
            }
            thread::sleep(poll);
        }
    }
}

/// Latest completed frame, handed from the sync thread to whoever displays
/// it.
pub type FrameSlot = Arc<Mutex<Option<FrameOutput>>>;

pub struct FrameSync {
    bus: Bus,
    gate: Arc<VBlankGate>,
    ppu: Ppu,
    config: SyncConfig,
    ticks: u64,
}

impl FrameSync {
    pub fn new(bus: Bus, gate: Arc<VBlankGate>, config: SyncConfig) -> Self {
        Self {
            bus,
            gate,
            ppu: Ppu::with_options(config.translate),
            config,
            ticks: 0,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// One blank window followed by one translation.
    pub fn tick(&mut self) -> Result<&FrameOutput, PpuError> {
        self.ticks += 1;
        log_buffer::set_frame(self.ticks);

        io::write_vcount(&self.bus, self.config.vblank_open_line)?;
        self.gate.open();
        #[cfg(feature = "trace_sync")]
        log::trace!("vblank open, frame {}", self.ticks);

        thread::sleep(self.config.vblank_window());

        io::write_vcount(&self.bus, self.config.vblank_close_line)?;
        self.gate.close();
        #[cfg(feature = "trace_sync")]
        log::trace!("vblank closed, frame {}", self.ticks);

        let regs = RegisterSnapshot::capture(&self.bus)?;
        let oam = OamTable::capture(&*self.bus.mem)?;
        debug!("frame {}: dispcnt {:#06x}", self.ticks, regs.dispcnt.0);
        self.ppu.translate(&*self.bus.mem, &regs, &oam)
    }

    /// Ticks on a fixed period until `stop` is raised or `on_frame` breaks.
    /// A late tick reschedules from now instead of bursting to catch up.
    pub fn run<F>(&mut self, stop: &AtomicBool, mut on_frame: F) -> Result<(), PpuError>
    where
        F: FnMut(&FrameOutput) -> ControlFlow<()>,
    {
        self.run_ticks(stop, |sync| match sync.ppu.frame() {
            Some(frame) => on_frame(frame),
            None => ControlFlow::Continue(()),
        })
    }

    fn run_ticks<F>(&mut self, stop: &AtomicBool, mut after_tick: F) -> Result<(), PpuError>
    where
        F: FnMut(&mut Self) -> ControlFlow<()>,
    {
        let interval = self.config.frame_interval();
        let mut next = Instant::now();
        while !stop.load(Ordering::Acquire) {
            self.tick()?;
            if after_tick(self).is_break() {
                break;
            }

            next += interval;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                next = now;
            }
        }
        Ok(())
    }

    /// Moves the translated frame into `slot`. The frame it replaces becomes
    /// the translator's next output buffer.
    fn publish(&mut self, slot: &FrameSlot) {
        let mut latest = slot.lock().unwrap_or_else(|poisoned| {
            warn!("frame {}: frame slot was poisoned by a reader, recovering", self.ticks);
            slot.clear_poison();
            poisoned.into_inner()
        });
        match latest.as_mut() {
            Some(previous) => {
                self.ppu.swap_frame(previous);
            }
            None => {
                let mut frame = FrameOutput::new(self.config.translate.capacity);
                if self.ppu.swap_frame(&mut frame) {
                    *latest = Some(frame);
                }
            }
        }
    }

    /// Runs the loop on its own thread, publishing every frame into `slot`.
    ///
    /// A translation error is fatal: it is logged and the process exits.
    pub fn spawn(mut self, stop: Arc<AtomicBool>, slot: FrameSlot) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new().name("frame-sync".into()).spawn(move || {
            info!("frame sync started");
            let result = self.run_ticks(&stop, |sync| {
                sync.publish(&slot);
                ControlFlow::Continue(())
            });
            match result {
                Ok(()) => info!("frame sync stopped after {} frames", self.ticks),
                Err(err) => {
                    error!("frame {}: {}", self.ticks, err);
                    log::logger().flush();
                    std::process::exit(1);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusAccess;
    use crate::mem::{MemoryImage, Region, RegionAccess};
    use crate::ppu::Unimplemented;
    use crate::ppu::regs::{BackgroundControl, ObjAttributes};

    fn quick_config() -> SyncConfig {
        SyncConfig {
            frame_interval_us: 1_000,
            vblank_window_ms: 0,
            ..Default::default()
        }
    }

    fn scene(bus: &Bus) {
        let mut regs = RegisterSnapshot::default();
        regs.dispcnt.set_one_dimensional(true);
        regs.dispcnt.set_obj_enabled(true);
        regs.dispcnt.set_bg_enabled(0, true);
        let mut cnt = BackgroundControl::default();
        cnt.set_8bpp(true);
        cnt.set_screen_block(31);
        regs.backgrounds[0].control = cnt;
        regs.store(bus).unwrap();

        let mut obj = ObjAttributes::new(16, 16, 0, 0, 0);
        obj.set_8bpp(true);
        OamTable::store_slot(&*bus.mem, 0, &obj).unwrap();
        bus.mem.region_write16(Region::Palette, 0, 0x7FFF).unwrap();
    }

    #[test]
    fn config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.frame_interval(), Duration::from_micros(16_667));
        assert_eq!(config.vblank_window(), Duration::from_millis(5));
        assert_eq!((config.vblank_open_line, config.vblank_close_line), (160, 0));
    }

    #[test]
    fn gate_counts_windows() {
        let gate = VBlankGate::new();
        assert!(!gate.is_open());
        gate.open();
        assert!(gate.is_open());
        gate.close();
        gate.open();
        assert_eq!(gate.frame(), 2);

        let stop = AtomicBool::new(true);
        gate.close();
        assert!(!gate.wait_open(&stop, Duration::from_millis(1)));
    }

    #[test]
    fn tick_closes_window_and_translates() {
        let bus = Bus::new(MemoryImage::shared());
        scene(&bus);
        let gate = Arc::new(VBlankGate::new());
        let mut sync = FrameSync::new(bus.clone(), gate.clone(), quick_config());

        let frame = sync.tick().unwrap();
        assert_eq!(frame.metadata.num_sprites, 2);
        assert_eq!(frame.metadata.num_pixels, vec![65536, 64]);
        assert_eq!(frame.pixels.as_slice()[0].color, 0xF8F8_F800);

        assert_eq!(io::read_vcount(&bus).unwrap(), 0);
        assert!(!gate.is_open());
        assert_eq!(gate.frame(), 1);
        assert_eq!(sync.ticks(), 1);
    }

    #[test]
    fn writes_made_inside_the_window_are_picked_up() {
        let bus = Bus::new(MemoryImage::shared());
        scene(&bus);
        let gate = Arc::new(VBlankGate::new());
        let stop = Arc::new(AtomicBool::new(false));

        let writer = {
            let bus = bus.clone();
            let gate = gate.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                if gate.wait_open(&stop, Duration::from_millis(1)) {
                    assert_eq!(io::read_vcount(&bus).unwrap(), 160);
                    bus.write16(0x0500_0000, 0x7C00).unwrap();
                }
            })
        };

        let mut sync = FrameSync::new(
            bus,
            gate,
            SyncConfig {
                vblank_window_ms: 100,
                ..quick_config()
            },
        );
        let color = sync.tick().unwrap().pixels.as_slice()[0].color;
        stop.store(true, Ordering::Release);
        writer.join().unwrap();
        assert_eq!(color, 0xF800_0000);
    }

    #[test]
    fn run_stops_on_break() {
        let bus = Bus::new(MemoryImage::shared());
        scene(&bus);
        let mut sync = FrameSync::new(bus, Arc::new(VBlankGate::new()), quick_config());
        let stop = AtomicBool::new(false);
        let mut seen = 0;
        sync.run(&stop, |frame| {
            assert_eq!(frame.metadata.num_sprites, 2);
            seen += 1;
            if seen == 3 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
        })
        .unwrap();
        assert_eq!(seen, 3);
        assert_eq!(sync.ticks(), 3);
    }

    #[test]
    fn publish_swaps_frames_through_the_slot() {
        let bus = Bus::new(MemoryImage::shared());
        scene(&bus);
        let mut sync = FrameSync::new(bus.clone(), Arc::new(VBlankGate::new()), quick_config());
        let slot: FrameSlot = Arc::new(Mutex::new(None));

        sync.publish(&slot);
        assert!(slot.lock().unwrap().is_none());

        sync.tick().unwrap();
        sync.publish(&slot);
        assert_eq!(slot.lock().unwrap().as_ref().map(|f| f.metadata.num_sprites), Some(2));

        bus.write16(io::REG_DISPCNT, 0).unwrap();
        sync.tick().unwrap();
        sync.publish(&slot);
        assert_eq!(slot.lock().unwrap().as_ref().map(|f| f.metadata.num_sprites), Some(0));
    }

    #[test]
    fn publish_recovers_a_poisoned_slot() {
        let bus = Bus::new(MemoryImage::shared());
        scene(&bus);
        let mut sync = FrameSync::new(bus, Arc::new(VBlankGate::new()), quick_config());
        let slot: FrameSlot = Arc::new(Mutex::new(None));
        {
            let slot = slot.clone();
            let _ = thread::spawn(move || {
                let _guard = slot.lock().unwrap();
                panic!("reader died holding the frame slot");
            })
            .join();
        }
        assert!(slot.is_poisoned());

        sync.tick().unwrap();
        sync.publish(&slot);
        assert!(!slot.is_poisoned());
        assert_eq!(slot.lock().unwrap().as_ref().map(|f| f.pixels.len()), Some(65536 + 64));
    }

    #[test]
    fn unsupported_mode_surfaces_from_tick() {
        let bus = Bus::new(MemoryImage::shared());
        bus.write16(io::REG_DISPCNT, 0x0004).unwrap();
        let mut sync = FrameSync::new(bus, Arc::new(VBlankGate::new()), quick_config());
        assert_eq!(
            sync.tick().unwrap_err(),
            PpuError::Unimplemented {
                entry: None,
                feature: Unimplemented::VideoMode(4)
            }
        );
    }
}
