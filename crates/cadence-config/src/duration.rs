use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// A duration as written in a pipeline file.
///
/// Either a bare number of seconds (`600`) or a string with unit suffixes
/// (`"10m"`, `"1h30m"`, `"250ms"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
  Seconds(u64),
  Text(String),
}

impl DurationValue {
  /// Convert to a [`Duration`], validating the textual form.
  pub fn to_duration(&self) -> Result<Duration, LoadError> {
    match self {
      DurationValue::Seconds(secs) => Ok(Duration::from_secs(*secs)),
      DurationValue::Text(text) => parse_duration(text),
    }
  }
}

/// Parse a duration string such as `"90"`, `"45s"`, `"10m"` or `"1h30m"`.
///
/// A string of digits without a unit is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, LoadError> {
  let invalid = |message: &str| LoadError::InvalidDuration {
    value: input.to_string(),
    message: message.to_string(),
  };

  let text = input.trim();
  if text.is_empty() {
    return Err(invalid("empty duration"));
  }
  if text.chars().all(|c| c.is_ascii_digit()) {
    let secs: u64 = text.parse().map_err(|_| invalid("number out of range"))?;
    return Ok(Duration::from_secs(secs));
  }

  let mut total = Duration::ZERO;
  let mut rest = text;
  while !rest.is_empty() {
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
      return Err(invalid("expected a number"));
    }
    let value: u64 = rest[..digits]
      .parse()
      .map_err(|_| invalid("number out of range"))?;
    rest = &rest[digits..];

    let unit_len = rest.chars().take_while(|c| c.is_ascii_alphabetic()).count();
    let unit = &rest[..unit_len];
    rest = &rest[unit_len..];

    let part = match unit {
      "ms" => Some(Duration::from_millis(value)),
      "s" => Some(Duration::from_secs(value)),
      "m" => value.checked_mul(60).map(Duration::from_secs),
      "h" => value.checked_mul(60 * 60).map(Duration::from_secs),
      "" => return Err(invalid("missing unit (use ms, s, m or h)")),
      _ => return Err(invalid("unknown unit (use ms, s, m or h)")),
    };
    total = part
      .and_then(|part| total.checked_add(part))
      .ok_or_else(|| invalid("duration out of range"))?;
  }

  Ok(total)
}
