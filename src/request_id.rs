//! Short per-request ids, colored consistently in log output.

use owo_colors::{AnsiColors, DynColors, OwoColorize, Style};
use std::{fmt, time::Instant};

/// Palette cycled by id hash. Red is left out so ids never read as errors.
const PALETTE: [AnsiColors; 10] = [
    AnsiColors::Green,
    AnsiColors::Yellow,
    AnsiColors::Blue,
    AnsiColors::Magenta,
    AnsiColors::Cyan,
    AnsiColors::BrightGreen,
    AnsiColors::BrightYellow,
    AnsiColors::BrightBlue,
    AnsiColors::BrightMagenta,
    AnsiColors::BrightCyan,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        Self(nanoid::nanoid!(5))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable across runs: the same id always gets the same color.
    pub fn color(&self) -> AnsiColors {
        let hash = self
            .0
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
        PALETTE[hash as usize % PALETTE.len()]
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let style = Style::new().color(DynColors::Ansi(self.color()));
        let tagged = format!("[{}]", self.0);
        write!(f, "{}", tagged.style(style))
    }
}

/// Inserted into request extensions by the logging middleware.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: RequestId,
    pub started: Instant,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            id: RequestId::generate(),
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
