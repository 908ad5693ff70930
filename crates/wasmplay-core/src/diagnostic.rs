//! Toolchain diagnostics parsed into highlightable records.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static DIAGNOSTIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<path>[^:\s][^:]*):(?P<line>\d+)(?::(?P<col>\d+))?:\s*(?P<msg>.+)$")
        .expect("valid regex")
});

/// One `path:line:col: message` record.
///
/// `column` is 0 when the toolchain reported only a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub path: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl Diagnostic {
    /// Parse a single stderr line; `None` for lines that aren't positioned
    /// diagnostics (summaries such as `too many errors`).
    pub fn parse_line(line: &str) -> Option<Self> {
        let caps = DIAGNOSTIC_RE.captures(line.trim_end())?;
        Some(Self {
            path: caps["path"].to_string(),
            line: caps["line"].parse().ok()?,
            column: caps
                .name("col")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0),
            message: caps["msg"].to_string(),
        })
    }

    /// Whether the record points into the file at `path`, comparing by
    /// file name so `./main.go` and `/tmp/main.go` match.
    pub fn refers_to(&self, path: &str) -> bool {
        let name = |p: &str| p.rsplit('/').next().unwrap_or(p).to_string();
        name(&self.path) == name(path)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.column > 0 {
            write!(f, "{}:{}:{}: {}", self.path, self.line, self.column, self.message)
        } else {
            write!(f, "{}:{}: {}", self.path, self.line, self.message)
        }
    }
}

/// Every positioned diagnostic in a block of toolchain output.
pub fn parse(output: &str) -> Vec<Diagnostic> {
    output.lines().filter_map(Diagnostic::parse_line).collect()
}
