//! Stderr progress for the binaries: setup stages and a live occupancy line.
//!
//! Pretty output (spinners) only when stderr is a terminal and the mode allows it;
//! otherwise plain `==>` lines. Included into each binary with `#[path]`.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use parkwatch::{BgrFrame, FrameReport, ReportSink, SpotLayout};

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = spinner(Duration::from_millis(120));
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Spinner showing the latest free count, or `None` in plain mode.
    pub fn status_line(&self) -> Option<StatusLine> {
        if !self.use_pretty() {
            return None;
        }
        let bar = spinner(Duration::from_millis(200));
        bar.set_message("waiting for first frame");
        Some(StatusLine { bar })
    }
}

fn spinner(tick: Duration) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(tick);
    let style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

/// Report sink driving a one-line spinner: `frame 120 | Free: 3/5 | occupied [1, 4]`.
pub struct StatusLine {
    bar: ProgressBar,
}

impl ReportSink for StatusLine {
    fn name(&self) -> &'static str {
        "status-line"
    }

    fn consume(
        &mut self,
        report: &FrameReport,
        _frame: &BgrFrame,
        _layout: &SpotLayout,
    ) -> anyhow::Result<()> {
        let occupied: Vec<String> = report
            .occupied_spots
            .iter()
            .map(|id| id.get().to_string())
            .collect();
        self.bar.set_message(format!(
            "frame {} | {} | occupied [{}]",
            report.frame_index,
            report.summary(),
            occupied.join(", ")
        ));
        Ok(())
    }
}

impl Drop for StatusLine {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
