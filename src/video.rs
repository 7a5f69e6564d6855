use crate::error::{Error, Result};

use std::path::{Path, PathBuf};
use std::process::Command;

/// Metadata of the selected source video.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoInfo {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
}

impl VideoInfo {
    pub fn probe(ffprobe: &str, input: &Path) -> Result<Self> {
        let output = Command::new(ffprobe)
            .args([
                "-hide_banner", "-v", "error",
                "-select_streams", "v:0",
                "-show_entries", "stream=width,height:format=duration",
                "-of", "default=noprint_wrappers=1",
            ])
            .arg(input)
            .output()
            .map_err(|e| Error::Extraction(format!("Failed to execute ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Extraction(format!("ffprobe could not read {}: {}", input.display(), stderr.trim())));
        }

        let data = String::from_utf8(output.stdout)
            .map_err(|e| Error::Extraction(format!("Failed to parse ffprobe output: {}", e)))?;
        Self::parse(&data)
    }

    fn parse(data: &str) -> Result<Self> {
        let mut info = Self { duration: 0.0, width: 0, height: 0 };

        for line in data.lines() {
            if let Some((key, value)) = line.trim().split_once('=') {
                match key {
                    // "N/A" for streams without a known length
                    "duration" => info.duration = value.parse().unwrap_or(0.0),
                    "width" => info.width = value.parse()
                        .map_err(|_| Error::Extraction(format!("Failed to parse width: {}", value)))?,
                    "height" => info.height = value.parse()
                        .map_err(|_| Error::Extraction(format!("Failed to parse height: {}", value)))?,
                    _ => {}
                }
            }
        }

        if info.width == 0 || info.height == 0 {
            return Err(Error::Extraction("No decodable video stream found".to_string()));
        }
        Ok(info)
    }

}

/// Default name of an assembled video: `original_clip.mp4`, `processed_clip.mp4`.
pub fn output_file_name(source: &Path, processed: bool) -> String {
    format!("{}_{}.mp4", variant(processed), file_stem(source))
}

/// Default directory for exported stills: `clip_processed_frames`.
pub fn frames_dir_name(source: &Path, processed: bool) -> PathBuf {
    PathBuf::from(format!("{}_{}_frames", file_stem(source), variant(processed)))
}

pub fn still_file_name(index: usize, extension: &str) -> String {
    format!("frame-{:03}.{}", index, extension)
}

fn variant(processed: bool) -> &'static str {
    if processed { "processed" } else { "original" }
}

fn file_stem(source: &Path) -> String {
    source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("video"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ffprobe_output() {
        let data = "width=1280\nheight=720\nduration=10.010000\n";
        let info = VideoInfo::parse(data).unwrap();
        assert_eq!((info.width, info.height), (1280, 720));
        assert!((info.duration - 10.01).abs() < 1e-9);
    }

    #[test]
    fn unknown_duration_is_zero() {
        let info = VideoInfo::parse("width=64\nheight=64\nduration=N/A\n").unwrap();
        assert_eq!(info.duration, 0.0);
    }

    #[test]
    fn missing_video_stream_is_an_extraction_error() {
        assert!(matches!(VideoInfo::parse("duration=3.0\n"), Err(Error::Extraction(_))));
    }

    #[test]
    fn artifact_names_follow_source() {
        let source = Path::new("/videos/holiday.mov");
        assert_eq!(output_file_name(source, true), "processed_holiday.mp4");
        assert_eq!(output_file_name(source, false), "original_holiday.mp4");
        assert_eq!(frames_dir_name(source, false), PathBuf::from("holiday_original_frames"));
        assert_eq!(still_file_name(7, "jpg"), "frame-007.jpg");
    }
}
