use crate::frame::Frame;
use crate::stages::OutputVideo;

use std::fmt;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Idle,
    Extracting,
    Extracted,
    Processing,
    Done,
    Assembling,
    Error,
}

impl Stage {
    /// A command is in flight; only reset is accepted.
    pub fn is_busy(self) -> bool {
        matches!(self, Stage::Extracting | Stage::Processing | Stage::Assembling)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Extracting => "extracting",
            Stage::Extracted => "extracted",
            Stage::Processing => "processing",
            Stage::Done => "done",
            Stage::Assembling => "assembling",
            Stage::Error => "error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the presentation layer renders.
#[derive(Clone, Debug, Default)]
pub struct PipelineState {
    pub stage: Stage,
    pub message: String,
    pub error: Option<String>,
    pub encode_progress: f32,
    pub output: Option<OutputVideo>,
}

/// Working set for one selected video.
#[derive(Clone, Debug)]
pub struct Session {
    pub source: PathBuf,
    pub frames: Vec<Frame>,
}

impl Session {
    pub fn new(source: PathBuf) -> Self {
        Self { source, frames: Vec::new() }
    }

    pub fn all_processed(&self) -> bool {
        !self.frames.is_empty() && self.frames.iter().all(Frame::is_processed)
    }

    pub fn processed_count(&self) -> usize {
        self.frames.iter().filter(|frame| frame.is_processed()).count()
    }
}

/// Notifications sent to the presentation layer while commands run.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    StageChanged(Stage),
    Progress { stage: Stage, done: usize, total: usize },
    EncodeProgress(f32),
    Failed(String),
}
