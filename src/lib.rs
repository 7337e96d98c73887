pub mod association;
pub mod bbox;
pub mod calibration;
pub mod circular_queue;
pub mod classifier;
pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod events;
pub mod feed;
pub mod frame;
pub mod math;
pub mod owners;
pub mod report;
pub mod speed;
pub mod store;
pub mod track;

pub use calibration::{compute_scale, Calibration, CalibrationStore, InMemoryCalibrationStore};
pub use classifier::Status;
pub use config::EngineConfig;
pub use detection::Detection;
pub use engine::{Engine, FrameOutcome, ReportHandle, VehicleResult};
pub use error::{Error, Result};
pub use frame::Frame;
pub use report::{Report, TrackRecord};
pub use track::Track;

use std::collections::HashMap;
use std::sync::Arc;

use events::{Collaborators, WorkerStats};
use tracing::info;

pub trait SpeedTracking {
    fn update(&mut self, frames: &[Frame], src: &str) -> Result<Vec<FrameOutcome>>;
    fn report(&self, src: &str) -> Report;
}

type CollaboratorFactory = Box<dyn Fn(&str) -> Collaborators + Send>;

/// Front for several independent streams keyed by video id. Every stream
/// gets its own engine, track store and calibration.
pub struct SpeedCamera {
    config: EngineConfig,
    calibrations: Arc<dyn CalibrationStore>,
    collaborators: CollaboratorFactory,
    engines: HashMap<String, Engine>,
}

impl SpeedCamera {
    pub fn new(config: EngineConfig, calibrations: Arc<dyn CalibrationStore>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            calibrations,
            collaborators: Box::new(|_| Collaborators::default()),
            engines: HashMap::new(),
        })
    }

    pub fn with_collaborators<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Collaborators + Send + 'static,
    {
        self.collaborators = Box::new(factory);
        self
    }

    /// Returns the engine of `src`, starting it on first use. The stored
    /// calibration is looked up under the configured key, or `src` itself.
    pub fn engine(&mut self, src: &str) -> Result<&mut Engine> {
        if !self.engines.contains_key(src) {
            let key = self.config.calibration_key.as_deref().unwrap_or(src);
            let calibration =
                engine::resolve_calibration(&self.config, self.calibrations.as_ref(), key)?;

            let engine = Engine::new(
                src,
                self.config.clone(),
                calibration,
                (self.collaborators)(src),
            )?;

            self.engines.insert(src.to_string(), engine);
        }

        self.engines
            .get_mut(src)
            .ok_or_else(|| Error::InvalidConfig(format!("stream `{}` is not running", src)))
    }

    pub fn reporter(&self, src: &str) -> Option<ReportHandle> {
        self.engines.get(src).map(Engine::reporter)
    }

    pub fn streams(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(String::as_str)
    }

    /// Ends a stream, returning its final report.
    pub fn close(&mut self, src: &str) -> Option<(Report, WorkerStats)> {
        let engine = self.engines.remove(src)?;
        let (report, stats) = engine.finish();

        info!(stream = src, sent = stats.notifications_sent, "stream closed");

        Some((report, stats))
    }
}

impl SpeedTracking for SpeedCamera {
    fn update(&mut self, frames: &[Frame], src: &str) -> Result<Vec<FrameOutcome>> {
        let engine = self.engine(src)?;

        frames.iter().map(|f| engine.process_frame(f)).collect()
    }

    fn report(&self, src: &str) -> Report {
        match self.engines.get(src) {
            Some(engine) => engine.report(),
            None => Report::from_records(
                Vec::new(),
                &classifier::Classifier::new(self.config.speed_limit_kmh, self.config.grace_kmh),
            ),
        }
    }
}
