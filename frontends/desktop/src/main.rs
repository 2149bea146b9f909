use clap::Parser;
use display_core::cpu::{CpuRunner, DemoRunner, SnapshotRunner};
use display_core::timing::SyncConfig;
use display_core::video::{GBA_SCREEN_H, GBA_SCREEN_W, write_ppm};
use display_core::{DisplayError, GbaDisplay};
use eframe::egui;
use egui::IconData;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(version, about = "Game Boy Advance video memory viewer.", long_about = None)]
struct Args {
    /// Packed memory image to display.
    #[arg(value_name = "MEMORY_IMAGE")]
    image_path: Option<PathBuf>,

    /// Show the built-in demo scene instead of an image.
    #[arg(long, conflicts_with = "image_path")]
    demo: bool,

    /// Run without a window for this many frames, then exit.
    #[arg(long, value_name = "FRAMES")]
    headless: Option<u64>,

    /// Where a headless run writes its last frame.
    #[arg(long, value_name = "PATH", requires = "headless")]
    ppm: Option<PathBuf>,

    /// Where a headless run writes the packed memory image.
    #[arg(long, value_name = "PATH", requires = "headless")]
    dump: Option<PathBuf>,

    /// Skip malformed or unsupported sprites instead of stopping.
    #[arg(long)]
    lenient: bool,
}

#[derive(Clone)]
struct DisplayLogEntry {
    frame: u64,
    level: log::Level,
    target: String,
    message: String,
}

impl From<display_core::log_buffer::LogEntry> for DisplayLogEntry {
    fn from(entry: display_core::log_buffer::LogEntry) -> Self {
        Self {
            frame: entry.frame,
            level: entry.level,
            target: entry.target,
            message: entry.message,
        }
    }
}

// Configuration struct for serialization.
#[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
struct Config {
    #[serde(default)]
    recent_files: Vec<PathBuf>,
    #[serde(default)]
    sync: SyncConfig,
}

fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "GbaDisplay", "GbaDisplay")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

fn load_config() -> Config {
    let Some(mut path) = config_dir() else {
        return Config::default();
    };
    path.push("config.toml");
    let Ok(config_str) = fs::read_to_string(&path) else {
        return Config::default();
    };
    toml::from_str(&config_str).unwrap_or_else(|e| {
        log::warn!("ignoring {}: {}", path.display(), e);
        Config::default()
    })
}

fn save_config(config: &Config) -> io::Result<()> {
    if let Some(mut path) = config_dir() {
        fs::create_dir_all(&path)?;
        path.push("config.toml");
        let config_str = toml::to_string(config).map_err(io::Error::other)?;
        fs::write(&path, config_str)?;
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
enum ImageSource {
    Demo,
    Snapshot(PathBuf),
}

impl ImageSource {
    fn describe(&self) -> String {
        match self {
            ImageSource::Demo => "built-in demo".to_string(),
            ImageSource::Snapshot(path) => path.display().to_string(),
        }
    }
}

// Builds and initializes the runner for `source`, then starts both threads.
fn start_display(source: &ImageSource, sync: SyncConfig) -> Result<GbaDisplay, DisplayError> {
    let program = "gba-display".to_string();
    let runner: Box<dyn CpuRunner> = match source {
        ImageSource::Demo => {
            let mut runner = DemoRunner::new();
            runner.init(&[program])?;
            Box::new(runner)
        }
        ImageSource::Snapshot(path) => {
            let mut runner = SnapshotRunner::new();
            runner.init(&[program, path.display().to_string()])?;
            Box::new(runner)
        }
    };
    GbaDisplay::start(runner, sync)
}

enum AppState {
    FileSelection,
    Running(ImageSource, GbaDisplay),
    Failed(ImageSource, String),
}

struct DisplayApp {
    state: AppState,
    recent_files: Vec<PathBuf>,
    sync: SyncConfig,
    texture: Option<egui::TextureHandle>,
    show_debug_panel: bool,
    log_entries: Vec<DisplayLogEntry>,
    auto_scroll_logs: bool,
    log_filter: LogFilter,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LogFilter {
    All,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl DisplayApp {
    fn new(source: Option<ImageSource>, config: Config) -> Self {
        let mut app = Self {
            state: AppState::FileSelection,
            recent_files: config.recent_files,
            sync: config.sync,
            texture: None,
            show_debug_panel: cfg!(debug_assertions),
            log_entries: Vec::new(),
            auto_scroll_logs: true,
            log_filter: LogFilter::All,
        };
        if let Some(source) = source {
            app.open(source);
        }
        app
    }

    // Keeps the most recent entry first, without duplicates, capped at 10.
    fn add_to_recent(recent: &mut Vec<PathBuf>, path: PathBuf) {
        if let Some(index) = recent.iter().position(|p| p == &path) {
            recent.remove(index);
        }
        recent.insert(0, path);
        recent.truncate(10);
    }

    fn open(&mut self, source: ImageSource) {
        if let ImageSource::Snapshot(path) = &source {
            Self::add_to_recent(&mut self.recent_files, path.clone());
        }
        // Stop the previous threads before the new ones start.
        self.state = AppState::FileSelection;
        self.texture = None;
        self.state = match start_display(&source, self.sync) {
            Ok(display) => AppState::Running(source, display),
            Err(e) => {
                log::error!("cannot open {}: {}", source.describe(), e);
                AppState::Failed(source, e.to_string())
            }
        };
    }

    fn open_image_dialog(&mut self) {
        if let Some(path) = rfd::FileDialog::new()
            .set_title("Open memory image")
            .add_filter("Memory image", &["bin"])
            .pick_file()
        {
            self.open(ImageSource::Snapshot(path));
        }
    }

    fn poll_logs(&mut self) {
        let new_logs = display_core::log_buffer::drain_logs();
        for entry in new_logs {
            self.log_entries.push(entry.into());
        }
        const MAX_LOG_ENTRIES: usize = 2000;
        if self.log_entries.len() > MAX_LOG_ENTRIES {
            let excess = self.log_entries.len() - MAX_LOG_ENTRIES;
            self.log_entries.drain(0..excess);
        }
    }

    fn level_color(level: log::Level) -> egui::Color32 {
        match level {
            log::Level::Error => egui::Color32::from_rgb(255, 100, 100),
            log::Level::Warn => egui::Color32::from_rgb(255, 200, 100),
            log::Level::Info => egui::Color32::from_rgb(100, 200, 255),
            log::Level::Debug => egui::Color32::from_rgb(180, 180, 180),
            log::Level::Trace => egui::Color32::from_rgb(120, 120, 120),
        }
    }

    fn filter_matches(&self, level: log::Level) -> bool {
        match self.log_filter {
            LogFilter::All | LogFilter::Trace => true,
            LogFilter::Error => level == log::Level::Error,
            LogFilter::Warn => level <= log::Level::Warn,
            LogFilter::Info => level <= log::Level::Info,
            LogFilter::Debug => level <= log::Level::Debug,
        }
    }

    fn debug_panel(&mut self, ctx: &egui::Context) {
        egui::SidePanel::right("debug_panel")
            .resizable(true)
            .min_width(250.0)
            .default_width(380.0)
            .max_width(560.0)
            .show(ctx, |ui| {
                ui.heading("Debug Log");
                ui.separator();

                ui.horizontal(|ui| {
                    ui.label("Filter:");
                    ui.selectable_value(&mut self.log_filter, LogFilter::All, "All");
                    ui.selectable_value(&mut self.log_filter, LogFilter::Error, "Error");
                    ui.selectable_value(&mut self.log_filter, LogFilter::Warn, "Warn");
                    ui.selectable_value(&mut self.log_filter, LogFilter::Info, "Info");
                    ui.selectable_value(&mut self.log_filter, LogFilter::Debug, "Debug");
                    ui.selectable_value(&mut self.log_filter, LogFilter::Trace, "Trace");
                });

                ui.horizontal(|ui| {
                    ui.checkbox(&mut self.auto_scroll_logs, "Auto-scroll");
                    if ui.button("Clear").clicked() {
                        self.log_entries.clear();
                        display_core::log_buffer::clear_logs();
                    }
                });
                ui.separator();

                let text_style = egui::TextStyle::Monospace;
                let row_height = ui.text_style_height(&text_style);
                let filtered: Vec<_> = self
                    .log_entries
                    .iter()
                    .filter(|e| self.filter_matches(e.level))
                    .collect();

                egui::ScrollArea::vertical()
                    .auto_shrink([true, false])
                    .stick_to_bottom(self.auto_scroll_logs)
                    .show_rows(ui, row_height, filtered.len(), |ui, row_range| {
                        for i in row_range {
                            if let Some(entry) = filtered.get(i) {
                                let color = Self::level_color(entry.level);
                                let short_target = entry.target.split("::").last().unwrap_or(&entry.target);
                                ui.horizontal(|ui| {
                                    ui.monospace(format!("{:>6}", entry.frame));
                                    ui.colored_label(color, format!("[{:5}]", entry.level));
                                    ui.colored_label(egui::Color32::GRAY, format!("{:>8}", short_target));
                                    ui.label(&entry.message);
                                });
                            }
                        }
                    });
            });
    }
}

impl eframe::App for DisplayApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_logs();

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Open Memory Image...").clicked() {
                        self.open_image_dialog();
                        ui.close_menu();
                    }
                    if ui.button("Demo Scene").clicked() {
                        self.open(ImageSource::Demo);
                        ui.close_menu();
                    }
                    if ui.button("Quit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });
                ui.menu_button("Window", |ui| {
                    if ui.checkbox(&mut self.show_debug_panel, "Debug Panel").clicked() {
                        ui.close_menu();
                    }
                });
            });
        });

        if self.show_debug_panel {
            self.debug_panel(ctx);
        }

        let mut reopen = None;
        egui::CentralPanel::default().show(ctx, |ui| match &mut self.state {
            AppState::FileSelection => {
                ui.heading("Recently Opened Memory Images");
                ui.separator();

                if self.recent_files.is_empty() {
                    ui.label("No recent files found. Use 'File -> Open Memory Image...' to get started.");
                } else {
                    egui::ScrollArea::vertical().show(ui, |ui| {
                        for file in &self.recent_files {
                            if ui.button(file.display().to_string()).clicked() {
                                reopen = Some(ImageSource::Snapshot(file.clone()));
                            }
                        }
                    });
                }
            }
            AppState::Failed(source, message) => {
                ui.heading("Could not start");
                ui.label(format!("{}: {}", source.describe(), message));
                if ui.button("Retry").clicked() {
                    reopen = Some(source.clone());
                }
            }
            AppState::Running(source, display) => {
                ui.heading("Display");
                ui.label(format!(
                    "{} ({} runner), frame {}",
                    source.describe(),
                    display.runner_name(),
                    display.frames()
                ));
                if let Some((sprites, pixels, capacity)) =
                    display.with_latest(|f| (f.metadata.num_sprites, f.pixels.len(), f.pixels.capacity()))
                {
                    ui.label(format!("{} sprites, {} of {} pixels", sprites, pixels, capacity));
                }
                ui.separator();

                let Some(rgba) = display.framebuffer_rgba() else {
                    ui.spinner();
                    return;
                };
                let size = [GBA_SCREEN_W, GBA_SCREEN_H];
                let image = egui::ColorImage::from_rgba_unmultiplied(size, rgba);
                let tex = self.texture.get_or_insert_with(|| {
                    ui.ctx()
                        .load_texture("framebuffer", image.clone(), egui::TextureOptions::NEAREST)
                });
                tex.set(image, egui::TextureOptions::NEAREST);

                let scale = 3.0;
                let desired = egui::Vec2::new(GBA_SCREEN_W as f32 * scale, GBA_SCREEN_H as f32 * scale);
                ui.image((tex.id(), desired));
            }
        });
        if let Some(source) = reopen {
            self.open(source);
        }

        ctx.request_repaint();
    }

    // Persist recent files and sync settings when the application quits.
    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.state = AppState::FileSelection;
        let config = Config {
            recent_files: self.recent_files.clone(),
            sync: self.sync,
        };
        if let Err(e) = save_config(&config) {
            eprintln!("Failed to save config: {}", e);
        }
    }
}

struct HeadlessOutputs {
    ppm: Option<PathBuf>,
    dump: Option<PathBuf>,
}

fn run_headless(source: &ImageSource, sync: SyncConfig, frames: u64, outputs: HeadlessOutputs) -> ExitCode {
    let mut display = match start_display(source, sync) {
        Ok(display) => display,
        Err(e) => {
            eprintln!("cannot open {}: {}", source.describe(), e);
            return ExitCode::FAILURE;
        }
    };

    let timeout = sync.frame_interval() * (frames.min(1_000_000) as u32 + 60) + Duration::from_secs(5);
    if !display.wait_for_frames(frames, timeout) {
        eprintln!("timed out after {} of {} frames", display.frames(), frames);
        return ExitCode::FAILURE;
    }
    if let Some((sprites, pixels, capacity)) =
        display.with_latest(|f| (f.metadata.num_sprites, f.pixels.len(), f.pixels.capacity()))
    {
        println!(
            "frame {}: {} sprites, {} of {} pixels",
            display.frames(),
            sprites,
            pixels,
            capacity
        );
    }

    if let Some(path) = outputs.dump {
        let written = fs::File::create(&path)
            .map(io::BufWriter::new)
            .and_then(|mut out| {
                display.memory().write_to(&mut out)?;
                out.flush()
            });
        if let Err(e) = written {
            eprintln!("cannot write {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
        println!("wrote {}", path.display());
    }

    if let Some(path) = outputs.ppm {
        let Some(rgba) = display.framebuffer_rgba() else {
            eprintln!("no frame to write");
            return ExitCode::FAILURE;
        };
        let written = fs::File::create(&path)
            .map(io::BufWriter::new)
            .and_then(|mut out| {
                write_ppm(&mut out, rgba, GBA_SCREEN_W, GBA_SCREEN_H)?;
                out.flush()
            });
        if let Err(e) = written {
            eprintln!("cannot write {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
        println!("wrote {}", path.display());
    }

    for entry in display_core::log_buffer::drain_logs() {
        eprintln!("{:>6} [{:5}] {}: {}", entry.frame, entry.level, entry.target, entry.message);
    }
    match display.stop() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let log_level = if cfg!(feature = "debug_logs") {
        log::LevelFilter::Trace
    } else if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let _ = display_core::log_buffer::init_logger(log_level);

    let args = Args::parse();
    let mut config = load_config();
    if args.lenient {
        config.sync.translate.policy = display_core::ppu::ErrorPolicy::Lenient;
    }
    let source = if args.demo {
        Some(ImageSource::Demo)
    } else {
        args.image_path.clone().map(ImageSource::Snapshot)
    };

    if let Some(frames) = args.headless {
        let source = source.unwrap_or(ImageSource::Demo);
        let outputs = HeadlessOutputs {
            ppm: args.ppm,
            dump: args.dump,
        };
        return run_headless(&source, config.sync, frames, outputs);
    }

    let icon = IconData::default();
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1100.0, 720.0])
            .with_title("GbaDisplay")
            .with_app_id("com.gbadisplay.viewer")
            .with_icon(icon),
        ..Default::default()
    };

    let result = eframe::run_native(
        "GbaDisplay",
        native_options,
        Box::new(move |_cc| Ok(Box::new(DisplayApp::new(source, config)))),
    );
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
