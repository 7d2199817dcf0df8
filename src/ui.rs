//! Terminal progress for the offline tools.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode) -> Self {
        Self::with_terminal(mode, std::io::stderr().is_terminal())
    }

    pub fn with_terminal(mode: UiMode, is_tty: bool) -> Self {
        let pretty = match mode {
            UiMode::Pretty => is_tty,
            UiMode::Auto => is_tty && std::env::var_os("NO_COLOR").is_none(),
            UiMode::Plain => false,
        };
        Self { pretty }
    }

    pub fn is_pretty(&self) -> bool {
        self.pretty
    }

    /// Start a stage; it reports its elapsed time when dropped.
    pub fn stage(&self, name: &str) -> Stage {
        let spinner = if self.pretty {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            Some(spinner)
        } else {
            eprintln!("==> {}", name);
            None
        };
        Stage {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
            detail: None,
        }
    }
}

pub struct Stage {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    detail: Option<String>,
}

impl Stage {
    /// Extra text shown next to the stage name when it completes.
    pub fn set_detail(&mut self, detail: impl Into<String>) {
        let detail = detail.into();
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!("{}… {}", self.name, detail));
        }
        self.detail = Some(detail);
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        let elapsed = format_duration(self.start.elapsed());
        let message = match &self.detail {
            Some(detail) => format!("✔ {}: {} ({})", self.name, detail, elapsed),
            None => format!("✔ {} ({})", self.name, elapsed),
        };
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
