//! Terminal and JSON rendering of goal results.

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream, Style};

use cairn_lib::goals::{GoalRow, RowStatus};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

/// Leading symbol and color for a row.
fn marker(status: RowStatus) -> (&'static str, Style) {
  match status {
    RowStatus::Ok => ("✓", Style::new().green()),
    RowStatus::Failed => ("✗", Style::new().red()),
    RowStatus::Skipped => ("-", Style::new().dimmed()),
  }
}

/// `address (tool): detail`, without the tool part when there is none.
pub fn row_label(row: &GoalRow) -> String {
  match &row.tool {
    Some(tool) => format!("{} ({tool}): {}", row.address, row.detail),
    None => format!("{}: {}", row.address, row.detail),
  }
}

/// One row on stdout, followed by any captured tool output, indented.
pub fn print_row(row: &GoalRow) {
  let (symbol, style) = marker(row.status);
  let mut label = row_label(row);
  if row.status != RowStatus::Ok {
    label = label.if_supports_color(Stream::Stdout, |s| s.style(style)).to_string();
  }
  println!("{} {label}", symbol.if_supports_color(Stream::Stdout, |s| s.style(style)));

  for line in row.output.iter().flat_map(|output| output.lines()) {
    println!("    {line}");
  }
}

/// Closing line of a goal on stderr.
pub fn print_summary(message: &str, failed: bool) {
  let (symbol, style) = marker(if failed { RowStatus::Failed } else { RowStatus::Ok });
  eprintln!("{} {message}", symbol.if_supports_color(Stream::Stderr, |s| s.style(style)));
}

pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {value}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()));
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn row_label_includes_tool_when_present() {
    let row = GoalRow::new("src:lib", RowStatus::Skipped, "skipped by configuration").tool("shfmt");
    assert_eq!(row_label(&row), "src:lib (shfmt): skipped by configuration");

    let row = GoalRow::new("src:app", RowStatus::Ok, "wrote dist/app.tar.gz");
    assert_eq!(row_label(&row), "src:app: wrote dist/app.tar.gz");
  }

  #[test]
  fn each_status_has_its_own_marker() {
    assert_eq!(marker(RowStatus::Ok).0, "✓");
    assert_eq!(marker(RowStatus::Failed).0, "✗");
    assert_eq!(marker(RowStatus::Skipped).0, "-");
  }
}
