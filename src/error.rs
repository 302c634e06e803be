//! Shared error utilities used across the compilation pipeline.
//!
//! Every stage returns a [`CompileResult`]; the first error wins and the
//! driver is the only place that turns it into process output. Diagnostics
//! are formatted in a style reminiscent of chibicc: the offending source line
//! is echoed and a caret points at the offending column.

use std::fmt;

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

/// A point in the source, captured eagerly so errors outlive the input text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
  pub line_text: String,
  /// 1-based.
  pub line: usize,
  /// 0-based, counted in characters.
  pub column: usize,
}

impl Position {
  /// Locate byte offset `loc` inside `source`. Offsets past the end clamp to it.
  pub fn locate(source: &str, loc: usize) -> Self {
    let mut loc = loc.min(source.len());
    while !source.is_char_boundary(loc) {
      loc -= 1;
    }
    let line_start = source[..loc].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[loc..]
      .find('\n')
      .map_or(source.len(), |i| loc + i);
    Self {
      line_text: source[line_start..line_end].to_string(),
      line: source[..line_start].matches('\n').count() + 1,
      column: source[line_start..loc].chars().count(),
    }
  }
}

impl fmt::Display for Position {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}\n{}^", self.line_text, " ".repeat(self.column))
  }
}

#[derive(Debug, Snafu)]
pub enum CompileError {
  #[snafu(display("{pos} {message}"))]
  Lex { pos: Position, message: String },

  #[snafu(display("{pos} {message}"))]
  Syntax { pos: Position, message: String },

  #[snafu(display("{pos} undefined {what}: {name}"))]
  UndefinedSymbol {
    pos: Position,
    what: &'static str,
    name: String,
  },

  #[snafu(display("{pos} {message}"))]
  Type { pos: Position, message: String },

  #[snafu(display("{pos} not an identifier"))]
  NotAddressable { pos: Position },
}

impl CompileError {
  pub fn lex(source: &str, loc: usize, message: impl Into<String>) -> Self {
    Self::Lex {
      pos: Position::locate(source, loc),
      message: message.into(),
    }
  }

  pub fn syntax(source: &str, loc: usize, message: impl Into<String>) -> Self {
    Self::Syntax {
      pos: Position::locate(source, loc),
      message: message.into(),
    }
  }

  pub fn undefined(source: &str, loc: usize, what: &'static str, name: impl Into<String>) -> Self {
    Self::UndefinedSymbol {
      pos: Position::locate(source, loc),
      what,
      name: name.into(),
    }
  }

  pub fn type_error(source: &str, loc: usize, message: impl Into<String>) -> Self {
    Self::Type {
      pos: Position::locate(source, loc),
      message: message.into(),
    }
  }

  pub fn not_addressable(source: &str, loc: usize) -> Self {
    Self::NotAddressable {
      pos: Position::locate(source, loc),
    }
  }

  pub fn position(&self) -> &Position {
    match self {
      Self::Lex { pos, .. }
      | Self::Syntax { pos, .. }
      | Self::UndefinedSymbol { pos, .. }
      | Self::Type { pos, .. }
      | Self::NotAddressable { pos } => pos,
    }
  }
}
