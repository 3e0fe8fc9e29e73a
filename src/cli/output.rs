//! Rendering of command results: JSON on stdout in `--json` mode, an
//! aligned key/value report otherwise.

use console::style;
use serde::Serialize;

use crate::error::{AbgError, Result, StructuredError};

pub fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AbgError::Config(format!("serialize output: {err}")))?;
    println!("{rendered}");
    Ok(())
}

/// Machine-readable error envelope printed by `main` in `--json` mode.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: bool,
    #[serde(flatten)]
    pub details: StructuredError,
}

impl From<&AbgError> for ErrorEnvelope {
    fn from(err: &AbgError) -> Self {
        Self {
            error: true,
            details: err.to_structured(),
        }
    }
}

/// Report builder for human output.
pub struct HumanLayout {
    rows: Vec<String>,
    label_width: usize,
}

impl Default for HumanLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl HumanLayout {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rows: Vec::new(),
            label_width: 16,
        }
    }

    pub fn title(&mut self, heading: &str) -> &mut Self {
        self.rows.push(style(heading).bold().to_string());
        self.rows.push(String::new());
        self
    }

    /// Title prefixed with a pass/fail mark.
    pub fn outcome(&mut self, ok: bool, heading: &str) -> &mut Self {
        let mark = if ok {
            style("✓").green().bold()
        } else {
            style("✗").red().bold()
        };
        self.rows.push(format!("{mark} {}", style(heading).bold()));
        self.rows.push(String::new());
        self
    }

    pub fn section(&mut self, heading: &str) -> &mut Self {
        self.rows.push(String::new());
        self.rows.push(style(heading).bold().underlined().to_string());
        self
    }

    pub fn kv(&mut self, label: &str, value: &str) -> &mut Self {
        let label = format!("{label}:");
        self.rows
            .push(format!("{label:width$} {value}", width = self.label_width));
        self
    }

    pub fn bullet(&mut self, item: &str) -> &mut Self {
        self.rows.push(format!("  - {item}"));
        self
    }

    pub fn warning(&mut self, text: &str) -> &mut Self {
        self.rows
            .push(format!("{} {text}", style("warning:").yellow().bold()));
        self
    }

    #[must_use]
    pub fn build(self) -> String {
        self.rows.join("\n")
    }
}

pub fn emit_human(layout: HumanLayout) {
    println!("{}", layout.build());
}
