use std::{collections::BTreeMap, convert::TryFrom};

#[cfg(feature = "tracing")]
use tracing::{debug, trace};

const COMMENT_PREFIX: char = '#';
const ASSIGNMENT_OPERATOR: char = '=';
const QUOTE: char = '"';

/// Parsed `KEY=VALUE` pairs. Iteration order is sorted by key.
pub type EnvMap = BTreeMap<String, String>;

/// Controls how values are post-processed after the inline comment rules run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseOptions {
  /// Remove one pair of surrounding double quotes from the value.
  pub strip_quotes: bool,
}

impl ParseOptions {
  /// Options used when applying files to the environment.
  pub const LOAD: Self = Self { strip_quotes: true };
  /// Options used when the stored representation must survive untouched.
  pub const RAW: Self = Self {
    strip_quotes: false,
  };
}

/// Parses a raw byte buffer into an [`EnvMap`].
///
/// The whole parse fails on the first malformed line; no partial map is returned.
pub fn parse(data: &[u8], options: ParseOptions) -> Result<EnvMap, ParseError> {
  let text = std::str::from_utf8(data)?;
  parse_str(text, options)
}

/// Same as [`parse`] for input that is already text.
pub fn parse_str(text: &str, options: ParseOptions) -> Result<EnvMap, ParseError> {
  #[cfg(feature = "tracing")]
  debug!(
    "Parsing env data with {} lines, strip_quotes={}",
    text.split('\n').count(),
    options.strip_quotes
  );

  let mut envs = EnvMap::new();

  for (index, raw) in text.split('\n').enumerate() {
    #[cfg(feature = "tracing")]
    trace!("Parsing line {}: {:?}", index + 1, raw);

    let line = Line::try_from(raw).map_err(|Malformed| ParseError::MalformedLine {
      line: index + 1,
      content: raw.to_string(),
    })?;

    if let Line::Pair { key, value } = line {
      let value = if options.strip_quotes {
        strip_quotes(value)
      } else {
        value
      };
      envs.insert(key.to_string(), value.to_string());
    }
  }

  #[cfg(feature = "tracing")]
  debug!("Parsed {} entries", envs.len());

  Ok(envs)
}

/// One classified line of env file text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Line<'a> {
  Empty,
  Comment,
  Pair { key: &'a str, value: &'a str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Malformed;

impl<'a> TryFrom<&'a str> for Line<'a> {
  type Error = Malformed;

  fn try_from(s: &'a str) -> Result<Self, Self::Error> {
    let trimmed = s.trim();

    if trimmed.is_empty() {
      return Ok(Line::Empty);
    }

    // `"#...` opens a comment as well.
    let unquoted = trimmed.strip_prefix(QUOTE).unwrap_or(trimmed);
    if trimmed.starts_with(COMMENT_PREFIX) || unquoted.starts_with(COMMENT_PREFIX) {
      return Ok(Line::Comment);
    }

    let (key, value) = trimmed.split_once(ASSIGNMENT_OPERATOR).ok_or(Malformed)?;
    let key = key.trim();
    if key.is_empty() {
      return Err(Malformed);
    }

    Ok(Line::Pair {
      key,
      value: scan_value(value.trim()),
    })
  }
}

#[derive(Debug, Clone, Copy)]
enum Scan {
  Bare,
  Quoted { open: usize },
}

/// Applies the quoting and inline comment rules to a trimmed value.
///
/// A bare `#` ends the scan. If at least one quoted section closed before
/// that point, the value is the span from the first opening quote to the last
/// closing quote, quotes included. Otherwise everything from the first `#`
/// onward is dropped.
fn scan_value(value: &str) -> &str {
  let mut state = Scan::Bare;
  let mut quoted: Option<(usize, usize)> = None;
  let mut first_hash = None;

  for (idx, ch) in value.char_indices() {
    match (state, ch) {
      (Scan::Bare, QUOTE) => state = Scan::Quoted { open: idx },
      (Scan::Bare, COMMENT_PREFIX) => {
        first_hash.get_or_insert(idx);
        break;
      }
      (Scan::Quoted { open }, QUOTE) => {
        let start = quoted.map_or(open, |(start, _)| start);
        quoted = Some((start, idx + ch.len_utf8()));
        state = Scan::Bare;
      }
      (Scan::Quoted { .. }, COMMENT_PREFIX) => {
        first_hash.get_or_insert(idx);
      }
      _ => {}
    }
  }

  match (quoted, first_hash) {
    (Some((start, end)), _) => &value[start..end],
    (None, Some(hash)) => value[..hash].trim_end(),
    (None, None) => value,
  }
}

/// Removes one pair of surrounding double quotes. Escape sequences are left as is.
fn strip_quotes(value: &str) -> &str {
  value
    .strip_prefix(QUOTE)
    .and_then(|inner| inner.strip_suffix(QUOTE))
    .unwrap_or(value)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
  /// A data line without a `=` delimiter or with an empty key
  #[error("Malformed line {line}: {content:?}")]
  MalformedLine { line: usize, content: String },
  /// The input is not valid UTF-8
  #[error("Invalid UTF-8 input: {0}")]
  InvalidUtf8(#[from] std::str::Utf8Error),
}
