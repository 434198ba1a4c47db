//! Terminal styling for space-sync output.

use console::Style;

/// How a line of output reads: each tone has its own mark and color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Failure,
    Warning,
}

impl Tone {
    fn mark(self) -> &'static str {
        match self {
            Tone::Success => "✓",
            Tone::Failure => "✗",
            Tone::Warning => "⚠",
        }
    }

    fn style(self) -> Style {
        match self {
            Tone::Success => Style::new().green(),
            Tone::Failure => Style::new().red(),
            Tone::Warning => Style::new().yellow(),
        }
    }

    /// `msg` behind the tone's colored mark.
    pub fn line(self, msg: &str) -> String {
        format!("{} {}", self.style().apply_to(self.mark()), msg)
    }
}

pub fn success(msg: &str) -> String {
    Tone::Success.line(msg)
}

pub fn error(msg: &str) -> String {
    Tone::Failure.line(msg)
}

pub fn warn(msg: &str) -> String {
    Tone::Warning.line(msg)
}

/// Bold section title.
pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// `source → destination` label (blue).
pub fn direction(source: &str, destination: &str) -> String {
    Style::new()
        .blue()
        .bold()
        .apply_to(format!("{} → {}", source, destination))
        .to_string()
}

/// Whether a configuration value is present, as shown by `validate`.
pub fn setting(present: bool) -> String {
    if present {
        Style::new().green().apply_to("set").to_string()
    } else {
        Style::new().yellow().bold().apply_to("NOT SET").to_string()
    }
}
