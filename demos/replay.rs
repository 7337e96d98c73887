//! Replays a detections dump through an engine and prints a report over
//! every vehicle seen, including the ones that left the scene mid-video.
//!
//! Input lines look like `<frame index>:<json array of detections>`, e.g.
//! `12:[{"bbox":[10,20,80,60],"p":0.9,"c":2}]`.
//!
//! usage: replay <detections> [config.toml] [owners.csv]

use std::collections::BTreeMap;
use std::io::BufRead;
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use speedtrack::classifier::Classifier;
use speedtrack::events::{CollaboratorError, Collaborators, LogNotifier, Notifier, Violation};
use speedtrack::feed::frame_channel;
use speedtrack::owners::CsvOwnerDirectory;
use speedtrack::{Calibration, Detection, Engine, EngineConfig, Frame, Report, TrackRecord};

/// Logs violations and keeps every finalized track.
#[derive(Clone, Default)]
struct Collector {
    finalized: Arc<Mutex<Vec<TrackRecord>>>,
}

impl Notifier for Collector {
    fn notify(&self, violation: &Violation) -> Result<(), CollaboratorError> {
        LogNotifier.notify(violation)
    }

    fn on_finalized(&self, _stream: &str, record: &TrackRecord) {
        self.finalized.lock().push(record.clone());
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);

    let in_file_name = args.next().context("expected detections file name")?;
    let config = match args.next() {
        Some(path) => EngineConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => EngineConfig::default(),
    };

    let collector = Collector::default();
    let mut collaborators = Collaborators::default().with_notifier(collector.clone());
    if let Some(path) = args.next() {
        let owners = CsvOwnerDirectory::load(&path).with_context(|| format!("loading {}", path))?;
        collaborators = collaborators.with_owner_directory(owners);
    }

    let dets_file = std::fs::File::open(&in_file_name)
        .with_context(|| format!("opening {}", in_file_name))?;

    let classifier = Classifier::new(config.speed_limit_kmh, config.grace_kmh);
    let calibration = Calibration::new(config.meters_per_pixel, config.fps)?;
    let fps = calibration.fps;
    let mut engine = Engine::new(in_file_name.as_str(), config, calibration, collaborators)?;

    let (tx, rx) = frame_channel(64);

    let reader = std::thread::spawn(move || -> anyhow::Result<()> {
        for line in std::io::BufReader::new(dets_file).lines() {
            let line = line?;

            let Some((idx, vector)) = line.split_once(':') else {
                eprintln!("wrong file format: expected `:`");
                continue;
            };

            let index = match idx.trim().parse::<u64>() {
                Ok(index) => index,
                Err(_) => {
                    eprintln!("wrong file format: parse frame index failed");
                    continue;
                }
            };

            let detections: Vec<Detection> = match serde_json::from_str(vector) {
                Ok(dets) => dets,
                Err(_) => {
                    eprintln!("wrong file format: parse json failed");
                    continue;
                }
            };

            tx.send(Frame::new(index, index as f32 / fps, detections))?;
        }

        Ok(())
    });

    let stats = engine.run(rx)?;

    reader
        .join()
        .map_err(|_| anyhow::anyhow!("reader thread panicked"))??;

    let (live, worker) = engine.finish();

    // the live tracks of the final report carry late enrichment
    let mut records: BTreeMap<u32, TrackRecord> = collector
        .finalized
        .lock()
        .drain(..)
        .map(|r| (r.track_id, r))
        .collect();
    for r in [live.overspeed, live.grace, live.within_limit, live.unknown].concat() {
        records.insert(r.track_id, r);
    }

    let report = Report::from_records(records.into_values(), &classifier);

    eprintln!("{:?}", stats);
    eprintln!("{:?}", worker);
    println!("{}", report.to_json()?);

    Ok(())
}
