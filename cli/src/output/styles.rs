//! Output styles using owo-colors stylesheet pattern

use owo_colors::Style;

/// Centralized stylesheet for CLI output colors.
#[derive(Default, Clone)]
pub struct Styles {
    /// Passed checks and completed phases (green)
    pub success: Style,
    /// Degraded but recoverable states (yellow)
    pub warning: Style,
    /// Failures and lockouts (red)
    pub error: Style,
    pub info: Style,
    /// Secondary text such as keys and resource ids
    pub dim: Style,
    pub bold: Style,
    /// Section titles
    pub header: Style,
    /// Hardening stage names
    pub stage: Style,
}

impl Styles {
    /// Apply colors to the stylesheet.
    pub fn colorize(&mut self) {
        self.success = Style::new().green();
        self.warning = Style::new().yellow();
        self.error = Style::new().red();
        self.info = Style::new().blue();
        self.dim = Style::new().dimmed();
        self.bold = Style::new().bold();
        self.header = Style::new().bold().cyan();
        self.stage = Style::new().truecolor(26, 107, 160);
    }
}
