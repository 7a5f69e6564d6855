mod arguments;

use arguments::Arguments;
use video_watermark_remover::stages::Progress;
use video_watermark_remover::video::{frames_dir_name, output_file_name};
use video_watermark_remover::{Error, Pipeline};

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,video_watermark_remover={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_pipeline(arguments: &Arguments) -> Result<PathBuf, Error> {
    let settings = arguments.settings()?;
    let processed = !arguments.originals;
    let output_dir = arguments.output_dir();

    let (sender, receiver) = crossbeam_channel::unbounded();
    let progress = Progress::execute(receiver, arguments.quiet);
    let pipeline = Pipeline::from_settings(&settings)?.with_events(sender);

    let result = (|| -> Result<PathBuf, Error> {
        pipeline.select_source(&arguments.input)?;
        pipeline.set_frame_count(settings.frame_count)?;
        let extracted = pipeline.extract()?;
        if extracted == 0 {
            return Err(Error::Validation(format!("{} has no duration, nothing to sample", arguments.input.display())));
        }
        if processed {
            pipeline.remove_watermarks()?;
        }
        if arguments.export_frames {
            let dir = output_dir.join(frames_dir_name(&arguments.input, processed));
            pipeline.export_frames(&dir, processed)?;
        }
        let video = if processed { pipeline.assemble_processed()? } else { pipeline.assemble_original()? };
        let path = output_dir.join(output_file_name(&arguments.input, processed));
        video.save(&path)?;
        Ok(path)
    })();

    drop(pipeline);
    let _ = progress.join();
    result
}

fn main() {
    let arguments = Arguments::parse();
    init_logging(arguments.verbose);

    match run_pipeline(&arguments) {
        Ok(path) => {
            info!(output = %path.display(), "completed");
            println!("Completed! {}", path.display());
        }
        Err(error) => {
            eprintln!("Error: {}", error);
            std::process::exit(1);
        }
    }
}
