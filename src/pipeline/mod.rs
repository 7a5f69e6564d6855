mod state;

pub use state::{Event, PipelineState, Session, Stage};

use crate::error::{Error, Result};
use crate::frame::{Frame, Still};
use crate::settings::{validate_frame_count, Settings};
use crate::stages::{
    Extract, FfmpegAssembler, FrameSampler, GeminiRemover, OutputVideo, VideoAssembler, WatermarkRemover,
};
use crate::video::still_file_name;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

struct Inner {
    state: PipelineState,
    session: Option<Session>,
    frame_count: usize,
    /// Bumped whenever the session is replaced or discarded.
    generation: u64,
}

impl Inner {
    fn begin(&self, command: &'static str, allowed: &[Stage]) -> Result<()> {
        let stage = self.state.stage;
        if stage.is_busy() {
            return Err(Error::Busy(stage.as_str()));
        }
        if !allowed.contains(&stage) {
            return Err(Error::InvalidState { command, stage: stage.as_str() });
        }
        Ok(())
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(Error::NoSource)
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or(Error::NoSource)
    }

    fn enter(&mut self, stage: Stage, message: impl Into<String>) {
        info!(from = %self.state.stage, to = %stage, "pipeline stage changed");
        self.state.stage = stage;
        self.state.message = message.into();
    }

    fn fail(&mut self, error: &Error) {
        warn!(stage = %self.state.stage, %error, "pipeline failed");
        self.state.stage = Stage::Error;
        self.state.message = String::from("Failed");
        self.state.error = Some(error.to_string());
    }
}

/// Owns the live session and sequences sampler, remover and assembler.
///
/// Commands take `&self` so the pipeline can be shared with another thread
/// that may `reset` it while a command is in flight. The state lock is never
/// held while a collaborator runs; every update made after one returns is
/// checked against the generation the command started under.
pub struct Pipeline {
    sampler: Box<dyn FrameSampler>,
    remover: Box<dyn WatermarkRemover>,
    assembler: Box<dyn VideoAssembler>,
    frame_rate: u32,
    pacing_delay: Duration,
    events: Option<Sender<Event>>,
    inner: Mutex<Inner>,
}

impl Pipeline {
    const ASSEMBLE_STAGES: &'static [Stage] = &[Stage::Idle, Stage::Extracted, Stage::Done];

    pub fn new(
        sampler: Box<dyn FrameSampler>,
        remover: Box<dyn WatermarkRemover>,
        assembler: Box<dyn VideoAssembler>,
        settings: &Settings,
    ) -> Self {
        Self {
            sampler,
            remover,
            assembler,
            frame_rate: settings.frame_rate,
            pacing_delay: settings.pacing_delay(),
            events: None,
            inner: Mutex::new(Inner {
                state: PipelineState::default(),
                session: None,
                frame_count: settings.frame_count,
                generation: 0,
            }),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            Box::new(Extract::from_settings(settings)),
            Box::new(GeminiRemover::from_settings(settings)?),
            Box::new(FfmpegAssembler::from_settings(settings)),
            settings,
        ))
    }

    pub fn with_events(mut self, events: Sender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Locks the state only if the session is still the one `generation` refers to.
    fn lock_current(&self, generation: u64) -> Result<MutexGuard<'_, Inner>> {
        let inner = self.lock();
        if inner.generation == generation {
            Ok(inner)
        } else {
            debug!(generation, live = inner.generation, "dropping update for a discarded session");
            Err(Error::Discarded)
        }
    }

    /// Records a collaborator failure unless the session moved on meanwhile.
    fn finish_with_error(&self, generation: u64, error: Error) -> Error {
        match self.lock_current(generation) {
            Ok(mut inner) => {
                inner.fail(&error);
                drop(inner);
                self.emit(Event::Failed(error.to_string()));
                self.emit(Event::StageChanged(Stage::Error));
                error
            }
            Err(discarded) => discarded,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.lock().state.clone()
    }

    pub fn stage(&self) -> Stage {
        self.lock().state.stage
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.lock().session.as_ref().map(|session| session.frames.clone()).unwrap_or_default()
    }

    pub fn source(&self) -> Option<PathBuf> {
        self.lock().session.as_ref().map(|session| session.source.clone())
    }

    pub fn frame_count(&self) -> usize {
        self.lock().frame_count
    }

    /// Replaces the session with a fresh one for `source`.
    pub fn select_source(&self, source: impl Into<PathBuf>) -> Result<()> {
        let source = source.into();
        let mut inner = self.lock();
        if inner.state.stage.is_busy() {
            return Err(Error::Busy(inner.state.stage.as_str()));
        }
        info!(source = %source.display(), "video selected");
        inner.generation += 1;
        inner.session = Some(Session::new(source));
        inner.state = PipelineState::default();
        drop(inner);
        self.emit(Event::StageChanged(Stage::Idle));
        Ok(())
    }

    pub fn set_frame_count(&self, frame_count: usize) -> Result<()> {
        validate_frame_count(frame_count)?;
        let mut inner = self.lock();
        if inner.state.stage.is_busy() {
            return Err(Error::Busy(inner.state.stage.as_str()));
        }
        inner.frame_count = frame_count;
        Ok(())
    }

    /// Samples the configured number of frames from the selected video.
    pub fn extract(&self) -> Result<usize> {
        let (generation, source, frame_count) = {
            let mut inner = self.lock();
            inner.begin("extract", &[Stage::Idle, Stage::Extracted, Stage::Done])?;
            let frame_count = inner.frame_count;
            let source = inner.session_mut()?.source.clone();
            inner.session_mut()?.frames.clear();
            inner.state.error = None;
            inner.state.output = None;
            inner.state.encode_progress = 0.0;
            inner.enter(Stage::Extracting, "Extracting frames...");
            (inner.generation, source, frame_count)
        };
        self.emit(Event::StageChanged(Stage::Extracting));

        let progress = |done: usize, total: usize| {
            if let Ok(mut inner) = self.lock_current(generation) {
                inner.state.message = format!("Extracting frame {}/{}", done, total);
                drop(inner);
                self.emit(Event::Progress { stage: Stage::Extracting, done, total });
            }
        };
        let stills = match self.sampler.extract(&source, frame_count, &progress) {
            Ok(stills) => stills,
            Err(e) => return Err(self.finish_with_error(generation, into_failure(e, Error::Extraction))),
        };

        let mut inner = self.lock_current(generation)?;
        let extracted = stills.len();
        inner.session_mut()?.frames = stills
            .into_iter()
            .enumerate()
            .map(|(id, still)| Frame::new(id, still))
            .collect();
        inner.enter(Stage::Extracted, format!("Extracted {} frames", extracted));
        drop(inner);
        self.emit(Event::StageChanged(Stage::Extracted));
        Ok(extracted)
    }

    /// Sends every unprocessed frame, in id order, to the watermark remover.
    /// Stops at the first failure; frames processed so far are kept.
    pub fn remove_watermarks(&self) -> Result<()> {
        let (generation, pending, total) = {
            let mut inner = self.lock();
            inner.begin("remove watermarks", &[Stage::Idle, Stage::Extracted])?;
            let session = inner.session()?;
            if session.frames.is_empty() {
                return Err(Error::Validation("No frames have been extracted".to_string()));
            }
            let pending: Vec<usize> = session.frames.iter().filter(|f| !f.is_processed()).map(|f| f.id).collect();
            let total = session.frames.len();
            inner.state.error = None;
            inner.enter(Stage::Processing, format!("Removing watermarks (0/{})", total));
            (inner.generation, pending, total)
        };
        self.emit(Event::StageChanged(Stage::Processing));

        for (index, id) in pending.into_iter().enumerate() {
            if index > 0 && !self.pacing_delay.is_zero() {
                thread::sleep(self.pacing_delay);
            }

            let original = self.lock_current(generation)?.session()?.frames[id].original.clone();
            debug!(frame = id, "removing watermark");
            let processed = match self.remover.remove(&original) {
                Ok(still) => still,
                Err(e) => {
                    let error = into_failure(e, Error::Removal);
                    let error = match error {
                        Error::Removal(message) => Error::Removal(format!("frame {}: {}", id, message)),
                        other => other,
                    };
                    return Err(self.finish_with_error(generation, error));
                }
            };

            let mut inner = self.lock_current(generation)?;
            let session = inner.session_mut()?;
            let frame = &mut session.frames[id];
            if frame.processed.is_none() {
                frame.processed = Some(processed);
            }
            let done = session.processed_count();
            inner.state.message = format!("Removing watermarks ({}/{})", done, total);
            drop(inner);
            self.emit(Event::Progress { stage: Stage::Processing, done, total });
        }

        let mut inner = self.lock_current(generation)?;
        inner.enter(Stage::Done, format!("Removed watermarks from {} frames", total));
        drop(inner);
        self.emit(Event::StageChanged(Stage::Done));
        Ok(())
    }

    pub fn assemble_original(&self) -> Result<OutputVideo> {
        self.assemble(false)
    }

    /// Requires every frame to have been processed.
    pub fn assemble_processed(&self) -> Result<OutputVideo> {
        self.assemble(true)
    }

    fn assemble(&self, processed: bool) -> Result<OutputVideo> {
        let (generation, stills) = {
            let mut inner = self.lock();
            if inner.state.stage.is_busy() {
                return Err(Error::Busy(inner.state.stage.as_str()));
            }
            let stills = Self::select_stills(inner.session()?, processed)?;
            inner.begin("assemble", Self::ASSEMBLE_STAGES)?;
            inner.state.output = None;
            inner.state.encode_progress = 0.0;
            inner.enter(Stage::Assembling, "Encoding video...");
            (inner.generation, stills)
        };
        self.emit(Event::StageChanged(Stage::Assembling));

        let progress = |fraction: f32| {
            let fraction = fraction.clamp(0.0, 1.0);
            if let Ok(mut inner) = self.lock_current(generation) {
                inner.state.encode_progress = fraction;
                drop(inner);
                self.emit(Event::EncodeProgress(fraction));
            }
        };
        let refs: Vec<&Still> = stills.iter().collect();
        let video = match self.assembler.assemble(&refs, self.frame_rate, &progress) {
            Ok(video) => video,
            Err(e) => return Err(self.finish_with_error(generation, into_failure(e, Error::Assembly))),
        };

        let mut inner = self.lock_current(generation)?;
        inner.state.encode_progress = 1.0;
        inner.state.output = Some(video.clone());
        inner.enter(Stage::Idle, format!("Encoded {} frames", refs.len()));
        drop(inner);
        self.emit(Event::StageChanged(Stage::Idle));
        Ok(video)
    }

    /// Writes the original or processed stills into `dir` as `frame-000.jpg`, ...
    pub fn export_frames(&self, dir: &Path, processed: bool) -> Result<usize> {
        let stills = {
            let inner = self.lock();
            if inner.state.stage.is_busy() {
                return Err(Error::Busy(inner.state.stage.as_str()));
            }
            Self::select_stills(inner.session()?, processed)?
        };

        fs::create_dir_all(dir)?;
        for (index, still) in stills.iter().enumerate() {
            fs::write(dir.join(still_file_name(index, still.extension())), &still.bytes)?;
        }
        info!(dir = %dir.display(), frames = stills.len(), "frames exported");
        Ok(stills.len())
    }

    /// Discards the session and returns to idle. Always succeeds.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.session = None;
        inner.state = PipelineState::default();
        info!("pipeline reset");
        drop(inner);
        self.emit(Event::StageChanged(Stage::Idle));
    }

    fn select_stills(session: &Session, processed: bool) -> Result<Vec<Still>> {
        if session.frames.is_empty() {
            return Err(Error::Validation("No frames to assemble".to_string()));
        }
        if !processed {
            return Ok(session.frames.iter().map(|frame| frame.original.clone()).collect());
        }
        if !session.all_processed() {
            return Err(Error::Validation(format!(
                "Only {} of {} frames have been processed",
                session.processed_count(),
                session.frames.len()
            )));
        }
        Ok(session.frames.iter().filter_map(|frame| frame.processed.clone()).collect())
    }
}

/// Keeps collaborator failures as they are and wraps anything else in `wrap`.
fn into_failure(error: Error, wrap: fn(String) -> Error) -> Error {
    if error.is_pipeline_failure() {
        error
    } else {
        wrap(error.to_string())
    }
}
