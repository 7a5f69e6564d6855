use crate::pipeline::{Event, Stage};

use std::fmt::Write;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};

/// Renders pipeline events as terminal progress bars.
pub struct Progress {
    hidden: bool,
    current: Option<(Stage, ProgressBar)>,
}

impl Progress {
    const ENCODE_STEPS: u64 = 100;

    fn new(hidden: bool) -> Self {
        Self { hidden, current: None }
    }

    fn label(stage: Stage) -> &'static str {
        match stage {
            Stage::Extracting => "extracting",
            Stage::Processing => "removing  ",
            Stage::Assembling => "encoding  ",
            _ => "",
        }
    }

    fn create_progress_bar(&self, stage: Stage, len: u64) -> ProgressBar {
        let progress_bar = if self.hidden {
            ProgressBar::with_draw_target(Some(len), ProgressDrawTarget::hidden())
        } else {
            ProgressBar::new(len)
        };
        let progress_template = "{prefix} [{elapsed_precise}] [{eta}] [{wide_bar:.white/green}] {pos}/{len} {percent} {msg}";
        let progress_style = ProgressStyle::default_bar()
            .template(progress_template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░-")
            .with_key("eta", |state: &ProgressState, w: &mut dyn Write| {
                let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
            })
            .with_key("percent", |state: &ProgressState, w: &mut dyn Write| {
                let _ = write!(w, "({:.0}%)", state.fraction() * 100.0);
            });
        progress_bar.set_style(progress_style);
        progress_bar.set_prefix(Self::label(stage));
        progress_bar
    }

    fn bar_for(&mut self, stage: Stage, len: u64) -> &ProgressBar {
        let stale = !matches!(&self.current, Some((current, _)) if *current == stage);
        if stale {
            self.finish();
            self.current = Some((stage, self.create_progress_bar(stage, len)));
        }
        let (_, bar) = self.current.get_or_insert_with(|| (stage, ProgressBar::hidden()));
        bar.set_length(len);
        bar
    }

    fn finish(&mut self) {
        if let Some((_, bar)) = self.current.take() {
            bar.finish();
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Progress { stage, done, total } => {
                self.bar_for(stage, total as u64).set_position(done as u64);
            }
            Event::EncodeProgress(fraction) => {
                let position = (fraction.clamp(0.0, 1.0) * Self::ENCODE_STEPS as f32).round() as u64;
                self.bar_for(Stage::Assembling, Self::ENCODE_STEPS).set_position(position);
            }
            Event::StageChanged(stage) => {
                if !matches!(&self.current, Some((current, _)) if *current == stage) {
                    self.finish();
                }
            }
            Event::Failed(message) => {
                if let Some((_, bar)) = self.current.take() {
                    bar.abandon_with_message(message);
                }
            }
        }
    }

    pub fn execute(receiver: Receiver<Event>, hidden: bool) -> JoinHandle<()> {
        let mut progress = Self::new(hidden);
        thread::spawn(move || {
            for event in receiver {
                progress.handle(event);
            }
            progress.finish();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(progress: &Progress) -> Option<(Stage, u64, Option<u64>)> {
        progress.current.as_ref().map(|(stage, bar)| (*stage, bar.position(), bar.length()))
    }

    #[test]
    fn one_bar_per_running_stage() {
        let mut progress = Progress::new(true);
        progress.handle(Event::StageChanged(Stage::Extracting));
        progress.handle(Event::Progress { stage: Stage::Extracting, done: 2, total: 5 });
        assert_eq!(position(&progress), Some((Stage::Extracting, 2, Some(5))));

        progress.handle(Event::StageChanged(Stage::Extracted));
        assert_eq!(position(&progress), None);

        progress.handle(Event::Progress { stage: Stage::Processing, done: 1, total: 5 });
        assert_eq!(position(&progress), Some((Stage::Processing, 1, Some(5))));
    }

    #[test]
    fn encode_progress_is_a_percentage() {
        let mut progress = Progress::new(true);
        progress.handle(Event::EncodeProgress(0.26));
        assert_eq!(position(&progress), Some((Stage::Assembling, 26, Some(100))));
        progress.handle(Event::EncodeProgress(4.0));
        assert_eq!(position(&progress), Some((Stage::Assembling, 100, Some(100))));
    }

    #[test]
    fn failure_abandons_the_bar() {
        let mut progress = Progress::new(true);
        progress.handle(Event::Progress { stage: Stage::Processing, done: 3, total: 5 });
        progress.handle(Event::Failed("frame 4: refused".to_string()));
        assert_eq!(position(&progress), None);
    }

    #[test]
    fn renderer_stops_when_senders_are_gone() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let handle = Progress::execute(receiver, true);
        sender.send(Event::Progress { stage: Stage::Extracting, done: 1, total: 2 }).unwrap();
        drop(sender);
        assert!(handle.join().is_ok());
    }
}
