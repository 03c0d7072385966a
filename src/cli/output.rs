//! Command output: results on stdout, human notes on stderr

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

/// Output format for command results
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Line-oriented text
    #[default]
    Plain,
    /// One JSON document for machine processing
    Json,
}

#[derive(Debug, Clone)]
pub struct OutputWriter {
    format: OutputFormat,
    quiet: bool,
}

impl OutputWriter {
    pub fn new(format: OutputFormat, quiet: bool) -> Self {
        Self { format, quiet }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Emit `value` as JSON, or the plain lines otherwise
    pub fn result<T: Serialize>(&self, value: &T, plain: impl FnOnce() -> Vec<String>) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.json(value),
            OutputFormat::Plain => {
                for line in plain() {
                    println!("{}", line);
                }
                Ok(())
            }
        }
    }

    pub fn json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    pub fn info(&self, message: &str) {
        if !self.quiet && self.format == OutputFormat::Plain {
            eprintln!("{}", message);
        }
    }

    pub fn warn(&self, message: &str) {
        if !self.quiet {
            eprintln!("warning: {}", message);
        }
    }

    pub fn error(&self, message: &str) {
        eprintln!("error: {}", message);
    }
}

/// Indented `label: a, b, c` line, or `label: none`
pub fn list_line(label: &str, items: &[String]) -> String {
    if items.is_empty() {
        format!("  {}: none", label)
    } else {
        format!("  {}: {}", label, items.join(", "))
    }
}
