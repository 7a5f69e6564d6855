//! Removes watermark overlays from a video: sample stills, inpaint each one
//! through a remote image-editing service, encode the results back into a video.

pub mod error;
pub mod frame;
pub mod pipeline;
pub mod settings;
pub mod stages;
pub mod video;

pub use error::{Error, Result};
pub use frame::{Frame, Still};
pub use pipeline::{Event, Pipeline, PipelineState, Stage};
pub use settings::Settings;
pub use stages::OutputVideo;
