//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! The tokenizer knows nothing about semantics beyond classifying words,
//! decoding literals and recognising operators. Multi-character punctuators
//! are matched before single-character ones to avoid ambiguity.

use log::trace;

use crate::error::{CompileError, CompileResult};

const KEYWORDS: [&str; 6] = ["return", "if", "else", "while", "for", "sizeof"];
const TYPE_NAMES: [&str; 3] = ["int", "char", "struct"];
const MULTI_CHAR_PUNCTS: [&str; 5] = ["<=", ">=", "==", "!=", "->"];

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Punctuator,
  Keyword,
  TypeName,
  Ident,
  Num,
  Str,
  Eof,
}

/// Thin wrapper for lexical information needed by later stages.
#[derive(Debug, Clone)]
pub struct Token {
  pub kind: TokenKind,
  pub value: Option<i64>,
  /// Decoded string literal contents, NUL-terminated.
  pub bytes: Option<Vec<u8>>,
  pub loc: usize,
  pub len: usize,
}

impl Token {
  /// Convenience constructor to keep the `tokenize` loop readable.
  pub fn new(kind: TokenKind, loc: usize, len: usize) -> Self {
    Self {
      kind,
      value: None,
      bytes: None,
      loc,
      len,
    }
  }

  fn number(loc: usize, len: usize, value: i64) -> Self {
    Self {
      value: Some(value),
      ..Self::new(TokenKind::Num, loc, len)
    }
  }

  fn string(loc: usize, len: usize, bytes: Vec<u8>) -> Self {
    Self {
      bytes: Some(bytes),
      ..Self::new(TokenKind::Str, loc, len)
    }
  }
}

fn is_ident_start(c: u8) -> bool {
  c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_continue(c: u8) -> bool {
  c.is_ascii_alphanumeric() || c == b'_'
}

fn classify_word(word: &str) -> TokenKind {
  if KEYWORDS.contains(&word) {
    TokenKind::Keyword
  } else if TYPE_NAMES.contains(&word) {
    TokenKind::TypeName
  } else {
    TokenKind::Ident
  }
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut tokens = Vec::new();
  let bytes = input.as_bytes();
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];
    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      let mut value: i64 = 0;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        value = value
          .wrapping_mul(10)
          .wrapping_add(i64::from(bytes[i] - b'0'));
        i += 1;
      }
      tokens.push(Token::number(start, i - start, value));
      continue;
    }

    if c == b'"' {
      let start = i;
      i += 1;
      while i < bytes.len() && bytes[i] != b'"' {
        i += 1;
      }
      if i >= bytes.len() {
        return Err(CompileError::lex(input, start, "unclosed string literal"));
      }
      let mut contents = bytes[start + 1..i].to_vec();
      contents.push(0);
      i += 1;
      tokens.push(Token::string(start, i - start, contents));
      continue;
    }

    if is_ident_start(c) {
      let start = i;
      while i < bytes.len() && is_ident_continue(bytes[i]) {
        i += 1;
      }
      let kind = classify_word(&input[start..i]);
      tokens.push(Token::new(kind, start, i - start));
      continue;
    }

    if let Some(op) = MULTI_CHAR_PUNCTS
      .into_iter()
      .find(|op| input[i..].starts_with(op))
    {
      tokens.push(Token::new(TokenKind::Punctuator, i, op.len()));
      i += op.len();
      continue;
    }

    if b"+-*/()<>=!;{},&[].".contains(&c) {
      tokens.push(Token::new(TokenKind::Punctuator, i, 1));
      i += 1;
      continue;
    }

    let invalid_char = input[i..].chars().next().unwrap_or('\0');
    return Err(CompileError::lex(
      input,
      i,
      format!("invalid token: '{invalid_char}'"),
    ));
  }

  tokens.push(Token::new(TokenKind::Eof, input.len(), 0));
  trace!("tokenized {} bytes into {} tokens", input.len(), tokens.len());
  Ok(tokens)
}

/// Return the slice from the source that produced this token.
pub fn token_text<'a>(token: &Token, source: &'a str) -> &'a str {
  let end = token.loc + token.len;
  &source[token.loc..end]
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>, source: &str) -> String {
  match token {
    Some(t) => match t.kind {
      TokenKind::Eof => "EOF".to_string(),
      _ => token_text(t, source).to_string(),
    },
    None => "EOF".to_string(),
  }
}
