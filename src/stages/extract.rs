use crate::error::{Error, Result};
use crate::frame::Still;
use crate::settings::Settings;
use crate::video::VideoInfo;

use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use image::ImageFormat;
use tracing::debug;

/// Seekable source of still images. One current frame at a time.
pub trait Decoder: Send + Sync {
    fn duration(&self, source: &Path) -> Result<f64>;
    fn capture(&self, source: &Path, timestamp: f64) -> Result<Still>;
}

pub trait FrameSampler: Send + Sync {
    /// Samples `frame_count` stills evenly across the source.
    /// `progress` is told `(captured, total)` after each capture.
    fn extract(&self, source: &Path, frame_count: usize, progress: &dyn Fn(usize, usize)) -> Result<Vec<Still>>;
}

pub struct FfmpegDecoder {
    ffmpeg: String,
    ffprobe: String,
    jpeg_quality: u8,
}

impl FfmpegDecoder {
    pub fn new(settings: &Settings) -> Self {
        Self {
            ffmpeg: settings.ffmpeg.clone(),
            ffprobe: settings.ffprobe.clone(),
            jpeg_quality: settings.jpeg_quality,
        }
    }
}

impl Decoder for FfmpegDecoder {
    fn duration(&self, source: &Path) -> Result<f64> {
        VideoInfo::probe(&self.ffprobe, source).map(|info| info.duration)
    }

    fn capture(&self, source: &Path, timestamp: f64) -> Result<Still> {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-ss", &format!("{:.3}", timestamp), "-i"])
            .arg(source)
            .args(["-frames:v", "1", "-vcodec", "png", "-f", "image2pipe", "pipe:1"])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Extraction(format!("Failed to spawn ffmpeg process: {}", e)))?;

        if !output.status.success() || output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Extraction(format!("No frame decoded at {:.3}s: {}", timestamp, stderr.trim())));
        }

        let image = image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)
            .map_err(|e| Error::Extraction(format!("Failed to load frame at {:.3}s: {}", timestamp, e)))?;
        Still::from_jpeg(&image, self.jpeg_quality)
    }
}

/// Evenly spaced sampler over any [`Decoder`].
pub struct Extract<D> {
    decoder: D,
    settle_delay: Duration,
}

impl<D: Decoder> Extract<D> {
    pub fn new(decoder: D, settle_delay: Duration) -> Self {
        Self { decoder, settle_delay }
    }

    pub fn timestamps(duration: f64, frame_count: usize) -> Vec<f64> {
        if duration <= 0.0 || !duration.is_finite() || frame_count == 0 {
            return Vec::new();
        }
        let interval = duration / frame_count as f64;
        (0..frame_count).map(|i| i as f64 * interval).collect()
    }
}

impl Extract<FfmpegDecoder> {
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(FfmpegDecoder::new(settings), settings.settle_delay())
    }
}

impl<D: Decoder> FrameSampler for Extract<D> {
    fn extract(&self, source: &Path, frame_count: usize, progress: &dyn Fn(usize, usize)) -> Result<Vec<Still>> {
        let duration = self.decoder.duration(source)?;
        let timestamps = Self::timestamps(duration, frame_count);
        debug!(duration, frames = timestamps.len(), "sampling video");

        let mut stills = Vec::with_capacity(timestamps.len());
        for (index, timestamp) in timestamps.iter().enumerate() {
            if index > 0 && !self.settle_delay.is_zero() {
                thread::sleep(self.settle_delay);
            }
            stills.push(self.decoder.capture(source, *timestamp)?);
            progress(stills.len(), timestamps.len());
        }
        Ok(stills)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeDecoder {
        duration: Result<f64>,
        fail_at: Option<usize>,
        seeks: Mutex<Vec<f64>>,
    }

    impl FakeDecoder {
        fn new(duration: f64) -> Self {
            Self { duration: Ok(duration), fail_at: None, seeks: Mutex::new(Vec::new()) }
        }
    }

    impl Decoder for FakeDecoder {
        fn duration(&self, _source: &Path) -> Result<f64> {
            match &self.duration {
                Ok(duration) => Ok(*duration),
                Err(e) => Err(Error::Extraction(e.to_string())),
            }
        }

        fn capture(&self, _source: &Path, timestamp: f64) -> Result<Still> {
            let mut seeks = self.seeks.lock().unwrap();
            if self.fail_at == Some(seeks.len()) {
                return Err(Error::Extraction("seek failed".to_string()));
            }
            seeks.push(timestamp);
            Ok(Still::new(timestamp.to_string().into_bytes(), "image/jpeg"))
        }
    }

    fn extract(decoder: FakeDecoder, count: usize) -> (Result<Vec<Still>>, Vec<f64>) {
        let sampler = Extract::new(decoder, Duration::ZERO);
        let result = sampler.extract(Path::new("clip.mp4"), count, &|_, _| {});
        let seeks = sampler.decoder.seeks.lock().unwrap().clone();
        (result, seeks)
    }

    #[test]
    fn samples_evenly_across_duration() {
        let (stills, seeks) = extract(FakeDecoder::new(10.0), 5);
        assert_eq!(stills.unwrap().len(), 5);
        assert_eq!(seeks, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn every_valid_count_yields_that_many_increasing_timestamps() {
        for count in [2, 3, 17, 120, 300] {
            let timestamps = Extract::<FakeDecoder>::timestamps(7.5, count);
            assert_eq!(timestamps.len(), count);
            assert!(timestamps.windows(2).all(|pair| pair[0] < pair[1]));
            assert!(timestamps.iter().all(|t| *t < 7.5));
        }
    }

    #[test]
    fn zero_duration_yields_no_frames() {
        let (stills, seeks) = extract(FakeDecoder::new(0.0), 10);
        assert!(stills.unwrap().is_empty());
        assert!(seeks.is_empty());
    }

    #[test]
    fn undecodable_source_is_an_extraction_error() {
        let decoder = FakeDecoder {
            duration: Err(Error::Extraction("invalid data".to_string())),
            ..FakeDecoder::new(0.0)
        };
        let (stills, _) = extract(decoder, 4);
        assert!(matches!(stills, Err(Error::Extraction(_))));
    }

    #[test]
    fn capture_failure_discards_partial_results() {
        let decoder = FakeDecoder { fail_at: Some(2), ..FakeDecoder::new(4.0) };
        let (stills, seeks) = extract(decoder, 4);
        assert!(matches!(stills, Err(Error::Extraction(_))));
        assert_eq!(seeks.len(), 2);
    }

    #[test]
    fn settle_delay_separates_captures() {
        let sampler = Extract::new(FakeDecoder::new(3.0), Duration::from_millis(40));
        let started = std::time::Instant::now();
        let stills = sampler.extract(Path::new("clip.mp4"), 3, &|_, _| {}).unwrap();
        assert_eq!(stills.len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn reports_progress_per_capture() {
        let sampler = Extract::new(FakeDecoder::new(3.0), Duration::ZERO);
        let reported = Mutex::new(Vec::new());
        sampler
            .extract(Path::new("clip.mp4"), 3, &|done, total| reported.lock().unwrap().push((done, total)))
            .unwrap();
        assert_eq!(*reported.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }
}
