//! Console styling, kept apart from the scheduler

use colored::{ColoredString, Colorize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Info,
    Success,
    Failure,
    Retry,
    Plain,
}

/// Apply `style` to `text`. Returns `text` unchanged when color is off.
pub fn render(text: &str, style: Style) -> String {
    styled(text, style).to_string()
}

/// Like [`render`], in bold
pub fn render_bold(text: &str, style: Style) -> String {
    styled(text, style).bold().to_string()
}

fn styled(text: &str, style: Style) -> ColoredString {
    match style {
        Style::Info => text.blue(),
        Style::Success => text.green(),
        Style::Failure => text.red(),
        Style::Retry => text.yellow(),
        Style::Plain => text.normal(),
    }
}

/// Remove ANSI escape sequences
pub fn strip_style(text: &str) -> String {
    strip_ansi_escapes::strip_str(text)
}

/// Force color on or off for the whole process
pub fn set_color_enabled(enabled: bool) {
    colored::control::set_override(enabled);
}
