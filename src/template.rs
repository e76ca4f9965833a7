use anyhow::{bail, Result};
use chrono::{
    format::{Item, StrftimeItems},
    DateTime, Utc,
};
use std::fmt::Write as _;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Dir,
    Run,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field),
}

/// Output file name pattern with `{dir}`, `{run}` and `{timestamp}`
/// placeholders. `{{` and `}}` produce literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTemplate {
    segments: Vec<Segment>,
}

impl FilenameTemplate {
    pub fn parse(pattern: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        bail!("unterminated placeholder in filename template '{pattern}'");
                    }
                    let field = match name.as_str() {
                        "dir" => Field::Dir,
                        "run" => Field::Run,
                        "timestamp" => Field::Timestamp,
                        other => bail!("unknown placeholder '{{{other}}}' in filename template"),
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                '}' => bail!("unmatched '}}' in filename template '{pattern}'"),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        if !segments
            .iter()
            .any(|s| matches!(s, Segment::Field(Field::Run) | Segment::Field(Field::Timestamp)))
        {
            bail!("filename template '{pattern}' must contain {{run}} or {{timestamp}}");
        }
        Ok(Self { segments })
    }

    /// Substitutes the fields. `run` is zero-padded to five digits.
    pub fn render(&self, dir: &str, run: u32, timestamp: &str) -> PathBuf {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(Field::Dir) => out.push_str(dir),
                Segment::Field(Field::Run) => {
                    let _ = write!(out, "{run:05}");
                }
                Segment::Field(Field::Timestamp) => out.push_str(timestamp),
            }
        }
        PathBuf::from(out)
    }
}

/// Rejects strftime patterns chrono cannot format; formatting an invalid
/// pattern would otherwise fail at the first file open.
pub fn validate_timestamp_format(format: &str) -> Result<()> {
    if format.is_empty() {
        bail!("timestamp format must not be empty");
    }
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        bail!("invalid timestamp format '{format}'");
    }
    Ok(())
}

pub fn format_timestamp(now: DateTime<Utc>, format: &str) -> String {
    let mut out = String::new();
    if write!(out, "{}", now.format(format)).is_err() {
        out.clear();
        let _ = write!(out, "{}", now.format("%Y%m%d%H%M%S"));
    }
    out
}
