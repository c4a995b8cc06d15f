//! Headless lodstream demo: streams a synthetic volume for a camera flying
//! past it and reports what a renderer would draw each second.

mod dataset;
mod scene;
mod sink;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use lodstream_config::{CliArgs, Config, GenerationConfig};
use lodstream_scheduler::{
    GenerationSettings, NodeState, SceneStreamer, SceneUpdateParams, SchedulerContext,
    SchedulerOptions,
};
use tracing::{info, warn};

use crate::dataset::{BlockMesh, MeshingEngine, SyntheticVolume};
use crate::scene::{CameraPath, LodSceneBuilder};
use crate::sink::FrameSink;

const DATASET_DIMENSIONS: [i64; 3] = [1024, 256, 256];
const FRAME_TIME: Duration = Duration::from_millis(16);
const SLICE_COST: Duration = Duration::from_micros(50);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);
const RELOAD_INTERVAL: u32 = 120;
const REPORT_INTERVAL: u32 = 60;

fn scheduler_options(config: &Config) -> SchedulerOptions {
    SchedulerOptions {
        worker_threads: config.scheduler.worker_threads,
        manager_thread_name: config.scheduler.manager_thread_name.clone(),
        items_per_tick: config.integration.items_per_tick,
        frame_delay: Duration::from_millis(config.integration.frame_delay_ms),
        check_invariants: config.debug.check_invariants,
        ..SchedulerOptions::default()
    }
}

fn generation_settings(config: &GenerationConfig) -> GenerationSettings {
    GenerationSettings {
        simplification_iterations: config.simplification_iterations,
        smoothing_lambda: config.smoothing_lambda,
        smoothing_iterations: config.smoothing_iterations,
        min_label_ratio: config.min_label_ratio,
    }
}

/// Per-frame schedule of identity changes, so every streamer operation runs.
#[derive(Debug, PartialEq, Eq)]
enum Event {
    RemoveIdentity(u32),
    AddIdentity(u32),
    Refresh,
}

fn event_at(frame: u32, frames: u32, ids: &[u32]) -> Option<Event> {
    let last = *ids.last()?;
    if frames < 8 {
        return None;
    }
    match frame {
        f if f == frames / 4 => Some(Event::RemoveIdentity(last)),
        f if f == frames / 2 => Some(Event::AddIdentity(last)),
        f if f == 3 * frames / 4 => Some(Event::Refresh),
        _ => None,
    }
}

struct Demo {
    streamer: SceneStreamer<u32, BlockMesh>,
    engine: Arc<MeshingEngine>,
    builder: LodSceneBuilder,
    sink: FrameSink,
    settings: GenerationSettings,
}

impl Demo {
    fn new(config: &Config, identities: u32) -> std::io::Result<Self> {
        let volume = Arc::new(SyntheticVolume::spread(
            DATASET_DIMENSIONS,
            config.scene.num_levels,
            identities,
        ));
        let engine = Arc::new(MeshingEngine::new(Arc::clone(&volume), SLICE_COST));
        let context = SchedulerContext::new(engine.clone(), volume.clone(), &scheduler_options(config))?;

        let mut streamer = SceneStreamer::new(context);
        for id in volume.identities() {
            streamer.add_identity(id);
        }

        Ok(Self {
            streamer,
            engine,
            builder: LodSceneBuilder::new(volume.dimensions(), &config.scene),
            sink: FrameSink::default(),
            settings: generation_settings(&config.generation),
        })
    }

    fn update_scene(&mut self, camera: glam::DVec3) {
        let tree = self.builder.build(camera);
        tracing::debug!(blocks = tree.len(), ?camera, "scene update");
        self.streamer.update_scene(SceneUpdateParams::new(
            tree,
            self.builder.grids().to_vec(),
            self.settings,
        ));
    }

    fn apply(&mut self, event: Event) {
        info!(?event, "identity change");
        match event {
            Event::RemoveIdentity(id) => {
                self.streamer.remove_identity(&id);
            }
            Event::AddIdentity(id) => {
                self.streamer.add_identity(id);
            }
            Event::Refresh => self.streamer.refresh(),
        }
    }

    fn report(&self, frame: u32) {
        let (tasks, completed) = self.streamer.progress();
        let stats = self.sink.stats();
        let generation = self.engine.totals();
        info!(
            frame,
            tasks,
            completed,
            loaded = stats.loaded,
            visible = stats.visible,
            surface = stats.visible_surface,
            per_level = ?stats.visible_per_level,
            in_flight = self.engine.in_flight(),
            generated = generation.generated,
            interrupted = generation.interrupted,
            "streaming"
        );
    }

    /// Ticks until every driver has integrated its last scene.
    fn settle(&mut self) -> bool {
        let deadline = Instant::now() + SETTLE_TIMEOUT;
        loop {
            self.streamer.tick(&mut self.sink);
            let (tasks, completed) = self.streamer.progress();
            if completed >= tasks && self.streamer.context().integration.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(tasks, completed, "scene did not settle in time");
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Verifies every driver and that the sink holds exactly their blocks.
    fn verify(&self) -> bool {
        let mut consistent = true;
        for id in self.streamer.identities() {
            let Some(driver) = self.streamer.driver(&id) else {
                continue;
            };
            if let Err(violation) = driver.check_invariants() {
                warn!(id, %violation, "driver state inconsistent");
                consistent = false;
            }
            let snapshot = driver.snapshot();
            let with_payload = snapshot.rendered.values().filter(|has| **has).count();
            if with_payload != self.sink.loaded_for(id) {
                warn!(id, with_payload, loaded = self.sink.loaded_for(id), "sink out of sync");
                consistent = false;
            }
            info!(
                id,
                generation = snapshot.generation,
                visible = snapshot.keys_in_state(NodeState::Visible).len(),
                hidden = snapshot.keys_in_state(NodeState::Hidden).len(),
                "identity settled"
            );
        }
        consistent
    }
}

fn check_reload(args: &CliArgs, config: &mut Config, config_dir: &Path, demo: &mut Demo) {
    match config.reload(config_dir) {
        Ok(Some(mut new_config)) => {
            new_config.apply_cli_overrides(args);
            if new_config == *config {
                return;
            }
            if new_config.generation != config.generation {
                info!("generation settings changed, regenerating all blocks");
                demo.settings = generation_settings(&new_config.generation);
            }
            *config = new_config;
        }
        Ok(None) => {}
        Err(e) => warn!("Failed to reload config: {e}"),
    }
}

fn run(args: &CliArgs, mut config: Config, config_dir: &Path) -> std::io::Result<bool> {
    let mut demo = Demo::new(&config, args.identities)?;
    let ids = demo.streamer.identities();
    let path = CameraPath::fly_by(DATASET_DIMENSIONS);
    let update_delay = Duration::from_millis(config.scene.scene_update_delay_ms);
    let mut last_update: Option<Instant> = None;

    info!(frames = args.frames, identities = ids.len(), "starting demo");
    for frame in 0..args.frames {
        if frame > 0 && frame % RELOAD_INTERVAL == 0 {
            check_reload(args, &mut config, config_dir, &mut demo);
        }
        if let Some(event) = event_at(frame, args.frames, &ids) {
            demo.apply(event);
        }
        if last_update.is_none_or(|at| at.elapsed() >= update_delay) {
            let camera = path.position_at(frame as f64 / args.frames.max(1) as f64);
            demo.update_scene(camera);
            last_update = Some(Instant::now());
        }

        demo.streamer.tick(&mut demo.sink);
        if frame % REPORT_INTERVAL == 0 {
            demo.report(frame);
        }
        std::thread::sleep(FRAME_TIME);
    }

    let settled = demo.settle();
    demo.report(args.frames);
    let consistent = settled && demo.verify();

    demo.streamer.shutdown();
    demo.streamer.tick(&mut demo.sink);
    info!(
        adds = demo.sink.adds,
        removals = demo.sink.removals,
        toggles = demo.sink.toggles,
        left = demo.sink.stats().loaded,
        "demo finished"
    );
    Ok(consistent)
}

fn main() {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = args
        .config
        .clone()
        .or_else(Config::default_dir)
        .unwrap_or_else(|| PathBuf::from(".lodstream"));

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    lodstream_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    match run(&args, config, &config_dir) {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            tracing::error!("Failed to start scheduler: {e}");
            std::process::exit(1);
        }
    }
}
