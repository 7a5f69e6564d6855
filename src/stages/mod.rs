mod extract;
mod remove;
mod assemble;
mod progress;

pub use extract::{Decoder, Extract, FfmpegDecoder, FrameSampler};
pub use remove::{GeminiRemover, WatermarkRemover};
pub use assemble::{FfmpegAssembler, OutputVideo, VideoAssembler};
pub use progress::Progress;
