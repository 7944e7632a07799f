//! Warnings and errors reported while compiling a spec, optionally pointing at a row of an IR
//! file.

#![deny(missing_docs)]

mod span;

use std::fmt::{Display, Formatter};

use colored::{Color, Colorize};
use serde::{Deserialize, Serialize};

pub use span::CodeSpan;

/// How bad a [`Diagnostic`] is.
#[derive(Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DiagnosticLevel {
    /// The output is produced, but something in it deserves attention.
    Warning,
    /// The output cannot be produced.
    Error,
}

impl DiagnosticLevel {
    /// The label printed in front of the message.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticLevel::Error => "Error",
            DiagnosticLevel::Warning => "Warning",
        }
    }

    /// The color of the label.
    pub fn color(&self) -> Color {
        match self {
            DiagnosticLevel::Warning => Color::BrightYellow,
            DiagnosticLevel::Error => Color::BrightRed,
        }
    }
}

impl Display for DiagnosticLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message for the user, with optional note, help and source location.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    level: DiagnosticLevel,
    message: String,
    note: Option<String>,
    help: Option<String>,
    code_span: Option<CodeSpan>,
}

impl Diagnostic {
    fn new(level: DiagnosticLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            note: None,
            help: None,
            code_span: None,
        }
    }

    /// Make a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Error, message)
    }

    /// Make a new warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Warning, message)
    }

    /// Attach a note, possibly spanning multiple lines.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Attach a hint on how to fix the problem.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Attach the location the diagnostic refers to.
    pub fn with_code_span(mut self, code_span: CodeSpan) -> Self {
        self.code_span = Some(code_span);
        self
    }

    /// Print the diagnostic, with colors.
    pub fn print(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let level = self.level.as_str();
        let pad = level.len();
        writeln!(
            f,
            "{}: {}",
            level.color(self.level.color()).bold(),
            self.message
        )?;
        if let Some(note) = &self.note {
            write!(f, "{:>pad$}: ", "Note".bold(), pad = pad)?;
            let mut lines = note.lines();
            if let Some(line) = lines.next() {
                writeln!(f, "{}", line)?;
            }
            for line in lines {
                writeln!(f, "{:>pad$}  {}", "", line, pad = pad)?;
            }
        }
        if let Some(help) = &self.help {
            writeln!(f, "{:>pad$}: {}", "Help".bold(), help, pad = pad)?;
        }
        if let Some(code_span) = &self.code_span {
            for line in code_span.to_string(self.level).lines() {
                writeln!(f, "{:>pad$} {}", "", line, pad = pad + 1)?;
            }
        }
        Ok(())
    }

    /// The level of the diagnostic.
    pub fn level(&self) -> DiagnosticLevel {
        self.level
    }

    /// The main message of the diagnostic.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The note, if any.
    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    /// The location, if any.
    pub fn code_span(&self) -> Option<&CodeSpan> {
        self.code_span.as_ref()
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.print(f)
    }
}

/// The diagnostics collected during a compilation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiagnosticContext {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticContext {
    /// Make an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic.
    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// All the recorded diagnostics, in order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Whether an error diagnostic was recorded.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.level() == DiagnosticLevel::Error)
    }
}
