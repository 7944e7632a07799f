use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Error};
use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::DiagnosticLevel;

/// A [`CodeSpan`] represent a slice of a single line of an IR file.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct CodeSpan {
    /// The path of the file where this span comes from.
    file_name: PathBuf,
    /// The line number inside the file.
    line_number: NonZeroUsize,
    /// The offset of the first byte of the span, relative to the start of the line.
    line_offset: usize,
    /// The length of the span.
    len: usize,
    /// The content of the line.
    line: String,
}

impl CodeSpan {
    /// Create a new [`CodeSpan`] from the content of a file, and the start-length pair.
    pub fn from_str(
        file_name: impl Into<PathBuf>,
        content: impl AsRef<str>,
        offset: usize,
        len: usize,
    ) -> Result<Self, Error> {
        let mut previous_lines_len = 0;
        for (index, line) in content.as_ref().split('\n').enumerate() {
            if previous_lines_len + line.len() == offset {
                bail!("Offset cannot be on the newline character");
            }
            if previous_lines_len + line.len() < offset {
                previous_lines_len += line.len() + 1; // Includes \n.
                continue;
            }
            let line_offset = offset - previous_lines_len;
            if line_offset + len > line.len() {
                bail!("Multiline spans are not supported");
            }
            return Self::from_line(file_name, index + 1, line, line_offset, len);
        }
        bail!("The offset exceeds the length of the file")
    }

    /// Create a new [`CodeSpan`] covering `len` bytes from `line_offset` of the given line, whose
    /// 1-based number is `line_number`.
    pub fn from_line(
        file_name: impl Into<PathBuf>,
        line_number: usize,
        line: impl Into<String>,
        line_offset: usize,
        len: usize,
    ) -> Result<Self, Error> {
        let line = line.into();
        let line_number =
            NonZeroUsize::new(line_number).ok_or_else(|| anyhow!("Line numbers start from 1"))?;
        if line_offset + len > line.len() {
            bail!("The span exceeds the length of the line");
        }
        Ok(Self {
            file_name: file_name.into(),
            line_number,
            line_offset,
            len,
            line,
        })
    }

    /// Get the content of the span as a `&str`.
    pub fn as_str(&self) -> &str {
        &self.line[self.line_offset..self.line_offset + self.len]
    }

    /// The 1-based line number of the span.
    pub fn line_number(&self) -> usize {
        self.line_number.get()
    }

    /// Obtain a string (with colors) of this span.
    pub fn to_string(&self, level: DiagnosticLevel) -> String {
        let mut result = format!(
            "{}:{}:{}\n",
            self.file_name.display(),
            self.line_number,
            self.line_offset + 1
        );

        let line_number = self.line_number.get().to_string();
        result += &format!("{} | {}\n", line_number, self.line);
        result += &" ".repeat(line_number.len() + 3 + self.line_offset);

        let marker = "^".repeat(self.len.max(1));
        result += &format!("{}\n", marker.color(level.color()).bold());
        result
    }
}
