//! Hand-off of classification outcomes to slow external collaborators.
//!
//! The frame loop only ever `try_send`s into a bounded queue. A single
//! worker thread drains it, runs plate reading, owner lookup and
//! notification, and hands enrichment results back over a second channel
//! that the engine applies between frames.
//!
//! Status changes are dropped when the queue is full. Overspeed and
//! finalized-track events are parked in a local backlog instead and sent as
//! soon as the worker frees a slot, at the latest on shutdown.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use serde_derive::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::classifier::Status;
use crate::error::Result;
use crate::owners::{CsvOwnerDirectory, OwnerRecord};
use crate::report::TrackRecord;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Missing credentials: {0}")]
    Credentials(String),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OverspeedEvent {
    pub stream: String,
    pub track_id: u32,
    pub class_id: i32,
    pub frame: u64,
    pub max_speed_kmh: f32,
    pub speed_limit_kmh: f32,
    pub grace_kmh: f32,
    pub speed_capped: bool,
    /// Last box of the vehicle, for cropping the plate region.
    pub bbox: [f32; 4],
}

/// Everything a notifier needs to tell someone about one violation.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Violation {
    pub event: OverspeedEvent,
    pub plate_text: Option<String>,
    pub owner: Option<OwnerRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StatusChanged {
        stream: String,
        track_id: u32,
        frame: u64,
        from: Status,
        to: Status,
        max_speed_kmh: f32,
    },
    Overspeed(OverspeedEvent),
    TrackFinalized {
        stream: String,
        record: TrackRecord,
    },
}

impl EngineEvent {
    /// Events that must reach the worker even when the queue is full.
    #[inline]
    pub fn is_lossless(&self) -> bool {
        !matches!(self, EngineEvent::StatusChanged { .. })
    }
}

/// Enrichment produced by the worker for one track.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub track_id: u32,
    pub plate_text: Option<String>,
    pub owner: Option<OwnerRecord>,
}

pub trait PlateReader: Send {
    fn read_plate(&self, event: &OverspeedEvent) -> Result<Option<String>, CollaboratorError>;
}

pub trait OwnerDirectory: Send {
    fn lookup(&self, plate: &str) -> Result<Option<OwnerRecord>, CollaboratorError>;
}

pub trait Notifier: Send {
    fn notify(&self, violation: &Violation) -> Result<(), CollaboratorError>;

    fn on_status(&self, _event: &EngineEvent) {}

    fn on_finalized(&self, _stream: &str, _record: &TrackRecord) {}
}

/// Plate reader for deployments without OCR.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPlateReader;

impl PlateReader for NoPlateReader {
    fn read_plate(&self, _event: &OverspeedEvent) -> Result<Option<String>, CollaboratorError> {
        Ok(None)
    }
}

/// Writes violations to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, v: &Violation) -> Result<(), CollaboratorError> {
        let owner = v.owner.as_ref();

        info!(
            stream = %v.event.stream,
            track = v.event.track_id,
            class = v.event.class_id,
            max_speed_kmh = v.event.max_speed_kmh,
            limit_kmh = v.event.speed_limit_kmh,
            grace_kmh = v.event.grace_kmh,
            plate = v.plate_text.as_deref().unwrap_or("-"),
            owner = owner.map(|o| o.owner.as_str()).unwrap_or("-"),
            "overspeed violation"
        );

        if owner.map_or(true, |o| o.email.is_empty()) {
            debug!(track = v.event.track_id, "no recipient address, delivery skipped");
        }

        Ok(())
    }
}

pub struct Collaborators {
    pub plates: Box<dyn PlateReader>,
    pub owners: Box<dyn OwnerDirectory>,
    pub notifier: Box<dyn Notifier>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            plates: Box::new(NoPlateReader),
            owners: Box::new(CsvOwnerDirectory::default()),
            notifier: Box::new(LogNotifier),
        }
    }
}

impl Collaborators {
    pub fn with_plate_reader<P: PlateReader + 'static>(mut self, plates: P) -> Self {
        self.plates = Box::new(plates);
        self
    }

    pub fn with_owner_directory<O: OwnerDirectory + 'static>(mut self, owners: O) -> Self {
        self.owners = Box::new(owners);
        self
    }

    pub fn with_notifier<N: Notifier + 'static>(mut self, notifier: N) -> Self {
        self.notifier = Box::new(notifier);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub overspeed_events: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub enrichments: u64,
}

pub struct EventEmitter {
    tx: Option<SyncSender<EngineEvent>>,
    backlog: VecDeque<EngineEvent>,
    enrichments: Receiver<Enrichment>,
    worker: Option<JoinHandle<WorkerStats>>,
    dropped: u64,
    disconnected: bool,
}

impl EventEmitter {
    pub fn spawn(capacity: usize, collaborators: Collaborators) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        let (enrich_tx, enrich_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("speedtrack-events".into())
            .spawn(move || run_worker(rx, enrich_tx, collaborators))?;

        Ok(Self {
            tx: Some(tx),
            backlog: VecDeque::new(),
            enrichments: enrich_rx,
            worker: Some(worker),
            dropped: 0,
            disconnected: false,
        })
    }

    /// Queues an event without blocking. Returns `false` if it was dropped;
    /// lossless events are parked in the backlog rather than dropped.
    pub fn emit(&mut self, event: EngineEvent) -> bool {
        self.flush();

        if self.tx.is_none() {
            return false;
        }

        // keep lossless events in order behind the ones already parked
        if event.is_lossless() && !self.backlog.is_empty() {
            self.backlog.push_back(event);
            return true;
        }

        match self.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) if event.is_lossless() => {
                debug!(backlog = self.backlog.len() + 1, "event queue full, event parked");
                self.backlog.push_back(event);
                true
            }
            Err(TrySendError::Full(event)) => {
                self.dropped += 1;
                warn!(dropped = self.dropped, ?event, "event queue full, dropping event");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.on_disconnected(1);
                false
            }
        }
    }

    /// Moves parked events into the queue while it has room.
    pub fn flush(&mut self) {
        while let Some(event) = self.backlog.pop_front() {
            match self.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    self.backlog.push_front(event);
                    break;
                }
                Err(TrySendError::Disconnected(_)) => {
                    let lost = 1 + self.backlog.len() as u64;
                    self.backlog.clear();
                    self.on_disconnected(lost);
                    break;
                }
            }
        }
    }

    /// Parked events not yet handed to the worker.
    #[inline]
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    fn try_send(&self, event: EngineEvent) -> std::result::Result<(), TrySendError<EngineEvent>> {
        match &self.tx {
            Some(tx) => tx.try_send(event),
            None => Err(TrySendError::Disconnected(event)),
        }
    }

    fn on_disconnected(&mut self, lost: u64) {
        self.dropped += lost;
        if !self.disconnected {
            self.disconnected = true;
            error!("event worker is gone, events are discarded");
        }
    }

    /// Enrichments finished by the worker since the last call.
    pub fn take_enrichments(&self) -> Vec<Enrichment> {
        self.enrichments.try_iter().collect()
    }

    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Closes the queue, waits for the worker to drain it and returns its stats.
    pub fn shutdown(&mut self) -> WorkerStats {
        if let Some(tx) = self.tx.take() {
            let parked = self.backlog.len();

            for event in self.backlog.drain(..) {
                if tx.send(event).is_err() {
                    error!(parked, "event worker is gone, parked events are lost");
                    break;
                }
            }
        }

        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                error!("event worker panicked");
                WorkerStats::default()
            }
            None => WorkerStats::default(),
        }
    }
}

impl Drop for EventEmitter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    rx: Receiver<EngineEvent>,
    enrich_tx: mpsc::Sender<Enrichment>,
    collaborators: Collaborators,
) -> WorkerStats {
    let Collaborators {
        plates,
        owners,
        notifier,
    } = collaborators;
    let mut stats = WorkerStats::default();

    for event in rx {
        match event {
            EngineEvent::Overspeed(ev) => {
                stats.overspeed_events += 1;

                let plate_text = match plates.read_plate(&ev) {
                    Ok(plate) => plate.filter(|p| !p.trim().is_empty()),
                    Err(err) => {
                        error!(track = ev.track_id, %err, "plate reading failed");
                        None
                    }
                };

                let owner = match plate_text.as_deref().map(|p| owners.lookup(p)) {
                    Some(Ok(owner)) => owner,
                    Some(Err(err)) => {
                        warn!(track = ev.track_id, %err, "owner lookup failed");
                        None
                    }
                    None => None,
                };

                if plate_text.is_some() || owner.is_some() {
                    stats.enrichments += 1;
                    // the engine may already be gone at the end of a stream
                    let _ = enrich_tx.send(Enrichment {
                        track_id: ev.track_id,
                        plate_text: plate_text.clone(),
                        owner: owner.clone(),
                    });
                }

                let violation = Violation {
                    event: ev,
                    plate_text,
                    owner,
                };

                match notifier.notify(&violation) {
                    Ok(()) => stats.notifications_sent += 1,
                    Err(err) => {
                        stats.notifications_failed += 1;
                        error!(track = violation.event.track_id, %err, "notification failed");
                    }
                }
            }
            event @ EngineEvent::StatusChanged { .. } => notifier.on_status(&event),
            EngineEvent::TrackFinalized { stream, record } => {
                notifier.on_finalized(&stream, &record)
            }
        }
    }

    debug!(?stats, "event worker finished");
    stats
}
