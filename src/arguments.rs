use video_watermark_remover::{Error, Settings};

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "video-watermark-remover",
    about = "Remove watermark overlays from a video, frame by frame, with an AI inpainting service",
    version,
    after_help = "The API key is read from UNMARK_API_KEY (or `api_key` in the config file).\n\
                  Every UNMARK_* variable overrides the matching config file setting."
)]
pub struct Arguments {
    /// Input video file
    pub input: PathBuf,

    /// Directory for the output video and exported frames (default: next to the input)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of frames to sample (2-300)
    #[arg(short, long)]
    pub frames: Option<usize>,

    /// Frame rate of the assembled video
    #[arg(long)]
    pub frame_rate: Option<u32>,

    /// Delay between inpainting requests, in milliseconds
    #[arg(long)]
    pub pacing_ms: Option<u64>,

    /// Inpainting model name
    #[arg(short, long)]
    pub model: Option<String>,

    /// Re-assemble the sampled originals without removing watermarks
    #[arg(long)]
    pub originals: bool,

    /// Also write the stills to a `<name>_<variant>_frames` directory
    #[arg(short, long)]
    pub export_frames: bool,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Hide progress bars
    #[arg(short, long)]
    pub quiet: bool,
}

impl Arguments {
    /// Settings from file and environment, overridden by flags.
    pub fn settings(&self) -> Result<Settings, Error> {
        let mut settings = Settings::load(self.config.as_deref())?;
        if let Some(frames) = self.frames {
            settings.frame_count = frames;
        }
        if let Some(frame_rate) = self.frame_rate {
            settings.frame_rate = frame_rate;
        }
        if let Some(pacing) = self.pacing_ms {
            settings.pacing_delay_ms = pacing;
        }
        if let Some(model) = &self.model {
            settings.model = model.clone();
        }
        settings.validate()?;

        if !self.originals && settings.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Config("an API key is required to remove watermarks (set UNMARK_API_KEY)".to_string()));
        }
        Ok(settings)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            self.input
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
        })
    }
}
