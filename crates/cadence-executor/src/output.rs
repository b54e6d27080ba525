use std::collections::VecDeque;

use cadence_config::OutputPruning;

/// Hard cap on a single line, applied before pruning.
pub(crate) const MAX_LINE_LENGTH: usize = 64 * 1024;

const TRUNCATION_MARKER: &str = "... [truncated]";

/// Cut `line` to at most `limit` bytes on a char boundary, marking the cut.
pub(crate) fn truncate_line(mut line: String, limit: usize) -> String {
  if line.len() <= limit {
    return line;
  }
  let mut end = limit;
  while !line.is_char_boundary(end) {
    end -= 1;
  }
  line.truncate(end);
  line.push_str(TRUNCATION_MARKER);
  line
}

/// Output retained for a step result.
///
/// With `keep_last` set only the newest lines are kept, so memory stays
/// bounded however much a step prints.
pub(crate) struct RetainedOutput {
  lines: VecDeque<String>,
  pruning: OutputPruning,
}

impl RetainedOutput {
  pub(crate) fn new(pruning: OutputPruning) -> Self {
    Self {
      lines: VecDeque::new(),
      pruning,
    }
  }

  pub(crate) fn push(&mut self, line: &str) {
    if self.pruning.keep_last == Some(0) {
      return;
    }
    let line = match self.pruning.max_line_length {
      Some(limit) => truncate_line(line.to_string(), limit),
      None => line.to_string(),
    };
    self.lines.push_back(line);
    if let Some(keep) = self.pruning.keep_last {
      while self.lines.len() > keep {
        self.lines.pop_front();
      }
    }
  }

  pub(crate) fn into_lines(self) -> Vec<String> {
    self.lines.into()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keeps_everything_without_policy() {
    let mut output = RetainedOutput::new(OutputPruning::default());
    for i in 0..5 {
      output.push(&format!("line {i}"));
    }
    assert_eq!(output.into_lines().len(), 5);
  }

  #[test]
  fn keep_last_retains_newest_lines() {
    let mut output = RetainedOutput::new(OutputPruning {
      keep_last: Some(2),
      max_line_length: None,
    });
    for i in 0..5 {
      output.push(&format!("line {i}"));
    }
    assert_eq!(output.into_lines(), vec!["line 3", "line 4"]);
  }

  #[test]
  fn max_line_length_truncates() {
    let mut output = RetainedOutput::new(OutputPruning {
      keep_last: None,
      max_line_length: Some(4),
    });
    output.push("abcdefgh");
    output.push("abc");
    assert_eq!(output.into_lines(), vec!["abcd... [truncated]", "abc"]);
  }

  #[test]
  fn truncation_respects_char_boundaries() {
    assert_eq!(truncate_line("héllo".to_string(), 2), "h... [truncated]");
  }
}
