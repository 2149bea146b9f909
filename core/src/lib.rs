#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info};
use thiserror::Error;

use crate::bus::Bus;
use crate::cpu::{CpuRunner, RunnerError};
use crate::mem::SharedMemory;
use crate::ppu::FrameOutput;
use crate::timing::{FrameSlot, FrameSync, SyncConfig, VBlankGate};
use crate::video::Rasterizer;

pub mod bus;
pub mod cpu;
pub mod io;
pub mod log_buffer;
pub mod mem;
pub mod ppu;
pub mod timing;
pub mod video;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("cpu runner: {0}")]
    Runner(#[from] RunnerError),
    #[error("spawning thread: {0}")]
    Thread(#[from] std::io::Error),
    #[error("cpu thread panicked")]
    CpuPanicked,
}

/// A running display: the CPU runner on one thread, the frame sync loop on
/// another, and the most recent translated frame between them.
pub struct GbaDisplay {
    mem: SharedMemory,
    gate: Arc<VBlankGate>,
    stop: Arc<AtomicBool>,
    latest: FrameSlot,
    rasterizer: Rasterizer,
    runner_name: &'static str,
    cpu_thread: Option<JoinHandle<Result<(), RunnerError>>>,
    sync_thread: Option<JoinHandle<()>>,
}

impl GbaDisplay {
    /// Starts both threads. `runner` must already be initialized.
    pub fn start(mut runner: Box<dyn CpuRunner>, config: SyncConfig) -> Result<Self, DisplayError> {
        let mem = runner.memory();
        let gate = Arc::new(VBlankGate::new());
        let stop = Arc::new(AtomicBool::new(false));
        let latest: FrameSlot = Arc::new(Mutex::new(None));
        let runner_name = runner.name();

        let cpu_thread = {
            let gate = gate.clone();
            let stop = stop.clone();
            thread::Builder::new().name("cpu".into()).spawn(move || {
                let result = runner.run(&gate, &stop);
                if let Err(err) = &result {
                    error!("{} runner stopped: {}", runner.name(), err);
                }
                result
            })?
        };

        let sync = FrameSync::new(Bus::new(mem.clone()), gate.clone(), config);
        let sync_thread = match sync.spawn(stop.clone(), latest.clone()) {
            Ok(handle) => handle,
            Err(err) => {
                stop.store(true, Ordering::Release);
                let _ = cpu_thread.join();
                return Err(err.into());
            }
        };
        info!("display started with {} runner", runner_name);

        Ok(Self {
            mem,
            gate,
            stop,
            latest,
            rasterizer: Rasterizer::new(),
            runner_name,
            cpu_thread: Some(cpu_thread),
            sync_thread: Some(sync_thread),
        })
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.mem
    }

    pub fn runner_name(&self) -> &'static str {
        self.runner_name
    }

    /// Blank windows opened so far.
    pub fn frames(&self) -> u64 {
        self.gate.frame()
    }

    /// Runs `f` on the latest completed frame, if there is one yet.
    pub fn with_latest<R>(&self, f: impl FnOnce(&FrameOutput) -> R) -> Option<R> {
        let guard = self.latest.lock().ok()?;
        guard.as_ref().map(f)
    }

    /// The latest frame composed to 240x160 RGBA.
    pub fn framebuffer_rgba(&mut self) -> Option<&[u8]> {
        {
            let guard = self.latest.lock().ok()?;
            let frame = guard.as_ref()?;
            self.rasterizer.render(frame);
        }
        Some(self.rasterizer.framebuffer())
    }

    /// Blocks until at least `frames` frames have been published or the
    /// timeout runs out.
    pub fn wait_for_frames(&self, frames: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let published = self.with_latest(|_| ()).is_some();
            if published && self.frames() >= frames {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Stops both threads and reports how the CPU runner ended.
    pub fn stop(&mut self) -> Result<(), DisplayError> {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.sync_thread.take() {
            let _ = handle.join();
        }
        match self.cpu_thread.take().map(JoinHandle::join) {
            Some(Ok(result)) => result.map_err(DisplayError::from),
            Some(Err(_)) => Err(DisplayError::CpuPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for GbaDisplay {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
