//! Progress reporting for the slow paths: index builds, embedding runs,
//! note loads. Rendering is suppressed when stderr is not a terminal or
//! `NO_PROGRESS` is set, so scripted callers see clean output.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;

pub struct Progress {
    bar: Option<ProgressBar>,
    label: &'static str,
}

impl Progress {
    pub fn start(label: &'static str) -> Progress {
        if !stderr_wants_progress() {
            return Progress { bar: None, label };
        }
        let bar = ProgressBar::new_spinner();
        bar.set_draw_target(ProgressDrawTarget::stderr());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(ProgressStyle::with_template("{spinner} {msg}").expect("static template"));
        bar.set_message(label);
        Progress {
            bar: Some(bar),
            label,
        }
    }

    /// Counter update, fed from the index-build progress callbacks.
    pub fn count(&self, done: usize, total: usize) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{} {done}/{total}", self.label));
        }
    }

    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

fn stderr_wants_progress() -> bool {
    if std::env::var_os("NO_PROGRESS").is_some() {
        return false;
    }
    std::io::stderr().is_terminal()
}
