use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Which widget the reporter currently drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Spinning,
    BarActive,
}

enum Widget {
    Idle,
    Spinning(ProgressBar),
    BarActive(ProgressBar),
}

/// Terminal progress: a spinner while the duration is unknown, then a bar.
///
/// The two never overlap, and once a bar has been shown the reporter does not
/// go back to spinning.
pub struct Reporter {
    widget: Widget,
    bar_shown: bool,
    hidden: bool,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter {
    /// Draws to stderr.
    pub fn new() -> Self {
        Self {
            widget: Widget::Idle,
            bar_shown: false,
            hidden: false,
        }
    }

    /// Tracks state without drawing anything.
    pub fn hidden() -> Self {
        Self {
            hidden: true,
            ..Self::new()
        }
    }

    pub fn mode(&self) -> Mode {
        match self.widget {
            Widget::Idle => Mode::Idle,
            Widget::Spinning(_) => Mode::Spinning,
            Widget::BarActive(_) => Mode::BarActive,
        }
    }

    /// Bar position, if a bar is active.
    pub fn position(&self) -> Option<u64> {
        match &self.widget {
            Widget::BarActive(bar) => Some(bar.position()),
            _ => None,
        }
    }

    pub fn bar_shown(&self) -> bool {
        self.bar_shown
    }

    fn target(&self) -> ProgressDrawTarget {
        if self.hidden {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr()
        }
    }

    /// Shows (or relabels) the spinner.
    pub fn spin(&mut self, label: &str) {
        if self.bar_shown {
            log::warn!("Ignoring spinner {label:?}: download bar already shown");
            return;
        }
        match &self.widget {
            Widget::Spinning(spinner) => spinner.set_message(label.to_string()),
            _ => {
                let spinner = ProgressBar::with_draw_target(None, self.target());
                spinner.set_style(
                    ProgressStyle::with_template("{spinner} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                spinner.set_message(label.to_string());
                if !self.hidden {
                    spinner.enable_steady_tick(Duration::from_millis(80));
                }
                self.widget = Widget::Spinning(spinner);
            }
        }
    }

    /// Clears the spinner, if one is running.
    pub fn stop(&mut self) {
        if let Widget::Spinning(spinner) = &self.widget {
            spinner.finish_and_clear();
            self.widget = Widget::Idle;
        }
    }

    /// Replaces the spinner with a bar from 0 to `total`.
    pub fn start_bar(&mut self, total: u64, position: u64) {
        if self.bar_shown {
            log::warn!("Ignoring second download bar");
            return;
        }
        self.stop();

        let bar = ProgressBar::with_draw_target(Some(total), self.target());
        bar.set_style(
            ProgressStyle::with_template(
                "{bar:40} {percent}% | ETA: {eta} | {bytes}/{total_bytes} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█░"),
        );
        bar.set_position(position.min(total));
        self.widget = Widget::BarActive(bar);
        self.bar_shown = true;
    }

    pub fn update(&mut self, position: u64, state: Option<&str>) {
        if let Widget::BarActive(bar) = &self.widget {
            bar.set_position(position);
            if let Some(state) = state {
                bar.set_message(state.to_string());
            }
        }
    }

    /// Leaves the bar on screen at its last position.
    pub fn finish(&mut self) {
        if let Widget::BarActive(bar) = &self.widget {
            bar.finish();
            self.widget = Widget::Idle;
        }
    }

    /// Stops whatever is running without completing it.
    pub fn abandon(&mut self) {
        match &self.widget {
            Widget::Spinning(spinner) => spinner.finish_and_clear(),
            Widget::BarActive(bar) => bar.abandon(),
            Widget::Idle => {}
        }
        self.widget = Widget::Idle;
    }
}
