use crate::error::{Error, Result};
use crate::frame::Still;
use crate::settings::Settings;
use crate::video::still_file_name;

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use once_cell::sync::{Lazy, OnceCell};
use tracing::{debug, info};

/// Process-wide encoders, one per ffmpeg program, each verified on first use.
static ENCODERS: Lazy<Encoders> = Lazy::new(Encoders::default);

const CODEC: &str = "libx264";
const PIXEL_FORMAT: &str = "yuv420p";
const INPUT_PATTERN: &str = "frame-%03d.png";
const OUTPUT_FILE: &str = "output.mp4";

/// An encoded video held in memory until the caller saves it.
#[derive(Clone, Debug)]
pub struct OutputVideo {
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
}

impl OutputVideo {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, &self.bytes)?;
        Ok(())
    }
}

pub trait VideoAssembler: Send + Sync {
    /// Encodes `stills` in the given order. `progress` receives fractions in [0, 1].
    fn assemble(&self, stills: &[&Still], frame_rate: u32, progress: &dyn Fn(f32)) -> Result<OutputVideo>;
}

struct Encoder {
    program: String,
}

impl Encoder {
    fn initialize(program: &str) -> Result<Self> {
        let output = Command::new(program)
            .args(["-hide_banner", "-encoders"])
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::FFmpegNotAvailable,
                _ => Error::Assembly(format!("Failed to start {}: {}", program, e)),
            })?;

        let encoders = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() || !encoders.contains(CODEC) {
            return Err(Error::Assembly(format!("The encoder is not supported: {}", CODEC)));
        }
        info!(program, "video encoder ready");
        Ok(Self { program: program.to_string() })
    }

    fn encode(&self, dir: &Path, frame_count: usize, frame_rate: u32, progress: &dyn Fn(f32)) -> Result<PathBuf> {
        let output_path = dir.join(OUTPUT_FILE);
        let mut child = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error", "-nostats", "-progress", "pipe:1"])
            .args(["-framerate", &frame_rate.to_string(), "-i"])
            .arg(dir.join(INPUT_PATTERN))
            .args([
                "-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2",
                "-c:v", CODEC,
                "-pix_fmt", PIXEL_FORMAT,
                "-y",
            ])
            .arg(&output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Assembly(format!("Failed to spawn ffmpeg process: {}", e)))?;

        let stdout = child.stdout.take().ok_or_else(|| Error::Assembly("ffmpeg stdout unavailable".to_string()))?;
        let mut stderr = child.stderr.take().ok_or_else(|| Error::Assembly("ffmpeg stderr unavailable".to_string()))?;
        let errors = thread::spawn(move || {
            let mut message = String::new();
            let _ = stderr.read_to_string(&mut message);
            message
        });

        for line in BufReader::new(stdout).lines().map_while(|line| line.ok()) {
            if let Some(fraction) = parse_progress(&line, frame_count) {
                progress(fraction);
            }
        }

        let status = child.wait().map_err(|e| Error::Assembly(format!("Failed to wait on ffmpeg: {}", e)))?;
        let errors = errors.join().unwrap_or_default();
        if !status.success() {
            return Err(Error::Assembly(format!("ffmpeg exited with {}: {}", status, errors.trim())));
        }
        Ok(output_path)
    }
}

/// Lazily initialized encoders keyed by program.
///
/// A failed initialization leaves its slot empty, so the next assembly
/// tries again.
#[derive(Default)]
struct Encoders {
    slots: Mutex<HashMap<String, Arc<OnceCell<Mutex<Encoder>>>>>,
}

impl Encoders {
    fn get_or_try_init<F>(&self, program: &str, init: F) -> Result<Arc<OnceCell<Mutex<Encoder>>>>
    where
        F: FnOnce(&str) -> Result<Encoder>,
    {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(program.to_string())
            .or_default()
            .clone();
        slot.get_or_try_init(|| init(program).map(Mutex::new))?;
        Ok(slot)
    }
}

/// Maps one `-progress` line to a completion fraction.
fn parse_progress(line: &str, frame_count: usize) -> Option<f32> {
    match line.trim().split_once('=')? {
        ("frame", value) if frame_count > 0 => {
            let encoded = value.trim().parse::<usize>().ok()?;
            Some((encoded as f32 / frame_count as f32).clamp(0.0, 1.0))
        }
        ("progress", "end") => Some(1.0),
        _ => None,
    }
}

/// Writes `frame-000.png`, `frame-001.png`, ... sized like the first still.
fn stage(stills: &[&Still], dir: &Path) -> Result<()> {
    let first = stills.first().ok_or_else(|| Error::Assembly("No frames to encode".to_string()))?;
    let size = first.decode().map(|image| (image.width(), image.height()))?;
    for (index, still) in stills.iter().enumerate() {
        fs::write(dir.join(still_file_name(index, "png")), still.to_png(Some(size))?)?;
    }
    Ok(())
}

pub struct FfmpegAssembler {
    program: String,
}

impl FfmpegAssembler {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.ffmpeg.clone())
    }

    fn run(&self, stills: &[&Still], frame_rate: u32, progress: &dyn Fn(f32)) -> Result<OutputVideo> {
        let slot = ENCODERS.get_or_try_init(&self.program, Encoder::initialize)?;
        let encoder = slot.get().ok_or_else(|| Error::Assembly("Encoder is not initialized".to_string()))?;
        let encoder = encoder.lock().map_err(|_| Error::Assembly("Encoder is unusable after a panic".to_string()))?;

        let workdir = tempfile::tempdir()?;
        stage(stills, workdir.path())?;
        debug!(frames = stills.len(), dir = %workdir.path().display(), "frames staged");

        progress(0.0);
        let output_path = encoder.encode(workdir.path(), stills.len(), frame_rate, progress)?;
        let bytes = fs::read(output_path)?;
        progress(1.0);
        Ok(OutputVideo { bytes, media_type: "video/mp4" })
    }
}

impl VideoAssembler for FfmpegAssembler {
    fn assemble(&self, stills: &[&Still], frame_rate: u32, progress: &dyn Fn(f32)) -> Result<OutputVideo> {
        self.run(stills, frame_rate, progress).map_err(|e| match e {
            Error::Assembly(_) => e,
            other => Error::Assembly(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn still(width: u32, height: u32) -> Still {
        Still::from_jpeg(&DynamicImage::ImageRgb8(RgbImage::new(width, height)), 90).unwrap()
    }

    #[test]
    fn encoder_is_initialized_once_per_program() {
        let encoders = Encoders::default();
        let inits = Mutex::new(Vec::new());
        let init = |program: &str| -> Result<Encoder> {
            inits.lock().unwrap().push(program.to_string());
            Ok(Encoder { program: program.to_string() })
        };

        let first = encoders.get_or_try_init("ffmpeg", init).unwrap();
        let second = encoders.get_or_try_init("ffmpeg", init).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = encoders.get_or_try_init("/opt/ffmpeg/bin/ffmpeg", init).unwrap();
        assert_eq!(other.get().unwrap().lock().unwrap().program, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(*inits.lock().unwrap(), vec!["ffmpeg", "/opt/ffmpeg/bin/ffmpeg"]);
    }

    #[test]
    fn failed_encoder_initialization_is_retried() {
        let encoders = Encoders::default();
        let attempts = AtomicUsize::new(0);
        let init = |program: &str| -> Result<Encoder> {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::FFmpegNotAvailable)
            } else {
                Ok(Encoder { program: program.to_string() })
            }
        };

        assert!(matches!(encoders.get_or_try_init("ffmpeg", init), Err(Error::FFmpegNotAvailable)));
        assert!(encoders.get_or_try_init("ffmpeg", init).is_ok());
        assert!(encoders.get_or_try_init("ffmpeg", init).is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn progress_lines_map_to_fractions() {
        assert_eq!(parse_progress("frame=5", 10), Some(0.5));
        assert_eq!(parse_progress("frame=15", 10), Some(1.0));
        assert_eq!(parse_progress("progress=continue", 10), None);
        assert_eq!(parse_progress("progress=end", 10), Some(1.0));
        assert_eq!(parse_progress("out_time_us=120000", 10), None);
        assert_eq!(parse_progress("frame=3", 0), None);
        assert_eq!(parse_progress("garbage", 10), None);
    }

    #[test]
    fn stages_frames_in_order_with_uniform_size() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, c) = (still(20, 10), still(40, 20), still(20, 10));
        stage(&[&a, &b, &c], dir.path()).unwrap();

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["frame-000.png", "frame-001.png", "frame-002.png"]);

        let resized = image::open(dir.path().join("frame-001.png")).unwrap();
        assert_eq!((resized.width(), resized.height()), (20, 10));
    }

    #[test]
    fn staging_nothing_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(stage(&[], dir.path()), Err(Error::Assembly(_))));
    }

    #[test]
    fn output_video_saves_to_nested_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("processed_clip.mp4");
        let video = OutputVideo { bytes: vec![0, 0, 0, 0x18], media_type: "video/mp4" };
        video.save(&path).unwrap();
        assert_eq!(fs::read(path).unwrap(), vec![0, 0, 0, 0x18]);
    }
}
