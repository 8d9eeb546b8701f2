//! `ezjail-admin list` output parsing
//!
//! The output is a header line, a separator of dash runs, then one line
//! per jail. Column names come from the header text under each dash run;
//! data lines are split on whitespace and matched to columns by position,
//! so names and paths containing spaces are not supported.

use crate::error::{Error, Result};
use crate::jail::types::{JailEntry, JailIp, JailList};
use std::cell::OnceCell;
use std::ops::Range;

/// Column names ezjail-admin is known to print
pub const EXPECTED_HEADERS: [&str; 5] = ["STA", "JID", "IP", "Hostname", "Root Directory"];

/// Column layout derived from the header and separator lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    /// Character span of each column
    pub spans: Vec<Range<usize>>,
    /// Trimmed header text under each span
    pub names: Vec<String>,
}

impl ColumnLayout {
    /// Derive columns: a boundary is any non-dash separator character or
    /// any position past the end of the header line.
    pub fn derive(header: &str, separator: &str) -> Self {
        let header: Vec<char> = header.chars().collect();
        let mut spans = Vec::new();
        let mut start = 0;
        let mut closed = false;

        for (i, c) in separator.chars().enumerate() {
            let past_header = i >= header.len();
            if c != '-' || past_header {
                spans.push(start..i);
                if past_header {
                    closed = true;
                    break;
                }
                start = i + 1;
            }
        }
        let end = separator.chars().count().min(header.len());
        if !closed && start < end {
            spans.push(start..end);
        }

        let names = spans
            .iter()
            .map(|span| header[span.clone()].iter().collect::<String>().trim().to_string())
            .collect();
        Self { spans, names }
    }

    fn is_expected(&self) -> bool {
        self.names.iter().map(String::as_str).eq(EXPECTED_HEADERS)
    }
}

/// Parser for list output; the column layout is validated once per parser
#[derive(Debug, Default)]
pub struct ListParser {
    layout: OnceCell<ColumnLayout>,
}

impl ListParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse list output into a map of jail name to entry
    pub fn parse(&self, output: &str) -> Result<JailList> {
        let lines: Vec<&str> = output.lines().collect();
        if lines.len() < 2 {
            return Err(Error::Parse(format!(
                "ezjail-admin list output too short:\n{}",
                output.trim()
            )));
        }

        if self.layout.get().is_none() {
            let layout = ColumnLayout::derive(lines[0], lines[1]);
            if !layout.is_expected() {
                return Err(Error::Parse(format!(
                    "ezjail-admin list output has unknown headers:\n{:?}",
                    layout.names
                )));
            }
            let _ = self.layout.set(layout);
        }

        let mut jails = JailList::new();
        let mut previous: Option<String> = None;

        for line in &lines[2..] {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if is_continuation(line) {
                let name = previous.as_ref().ok_or_else(|| {
                    Error::Parse(format!("Continuation line without a jail entry: '{}'", line))
                })?;
                let extra = line.split_whitespace().nth(1).ok_or_else(|| {
                    Error::Parse(format!("Continuation line without an address: '{}'", line))
                })?;
                let entry = jails
                    .get_mut(name)
                    .ok_or_else(|| Error::Parse(format!("Lost jail entry '{}'", name)))?;
                entry.ip = match &entry.ip {
                    JailIp::Single(first) => JailIp::Pair(first.clone(), extra.to_string()),
                    JailIp::Pair(..) => {
                        return Err(Error::Parse(format!(
                            "Jail '{}' lists more than two addresses",
                            name
                        )));
                    }
                };
                continue;
            }

            let (name, entry) = parse_row(line)?;
            previous = Some(name.clone());
            jails.insert(name, entry);
        }

        Ok(jails)
    }
}

/// Lines starting with a jail id or `N/A` carry an extra address
fn is_continuation(line: &str) -> bool {
    line.starts_with("N/A") || line.starts_with(|c: char| c.is_ascii_digit())
}

/// Zip whitespace-separated fields against status, jid, ip, name, root
fn parse_row(line: &str) -> Result<(String, JailEntry)> {
    let mut fields = line.split_whitespace();
    let mut next = || fields.next().unwrap_or_default().to_string();
    let status = next();
    let jid = next();
    let ip = next();
    let name = next();
    let root = next();

    if name.is_empty() {
        return Err(Error::Parse(format!("Malformed jail list line: '{}'", line)));
    }

    Ok((
        name,
        JailEntry {
            status,
            jid,
            ip: JailIp::Single(ip),
            root,
        },
    ))
}
