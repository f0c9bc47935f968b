//! Filter-list parsing.
//!
//! Two rule shapes are understood:
//! - AdBlock-anchored: `||host^` with optional `$opts`; the anchor, caret
//!   and options are discarded, leaving the blocked host pattern.
//! - Plain: the whole line is the pattern, possibly with `*` wildcards.
//!
//! Lines starting with `!` are comments; blank lines are skipped.

use std::path::Path;

use regex::Regex;

/// One parsed rule. Wildcard patterns carry a pre-compiled glob regex so
/// matching stays cheap per query.
#[derive(Debug, Clone)]
pub struct FilterRule {
    pub pattern: String,
    pub glob: Option<Regex>,
}

impl FilterRule {
    fn new(pattern: String) -> Self {
        let glob = if pattern.contains('*') { compile_glob(&pattern) } else { None };
        Self { pattern, glob }
    }
}

/// A named, ordered collection of rules from one file.
#[derive(Debug, Clone)]
pub struct FilterList {
    pub name: String,
    pub rules: Vec<FilterRule>,
}

impl FilterList {
    /// Parse filter-list text. Rule order is preserved.
    pub fn parse(name: impl Into<String>, text: &str) -> Self {
        let rules = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('!'))
            .map(|line| FilterRule::new(strip_adblock_syntax(line)))
            .collect();
        Self { name: name.into(), rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// `||host^$opts` -> `host`. Plain lines pass through unchanged.
fn strip_adblock_syntax(line: &str) -> String {
    if let Some(rest) = line.strip_prefix("||") {
        let rest = rest.split('$').next().unwrap_or(rest);
        rest.strip_suffix('^').unwrap_or(rest).to_string()
    } else {
        line.to_string()
    }
}

/// fnmatch-style glob over the whole host: `*` matches any run, `?` one
/// character.
fn compile_glob(pattern: &str) -> Option<Regex> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex.push('$');
    match Regex::new(&regex) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "unusable wildcard rule, skipping glob match");
            None
        }
    }
}

/// `easyprivacy_trackers_filter.txt` -> `Easyprivacy Trackers`.
pub fn list_name_from_file(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name.strip_suffix("_filter.txt")?;
    let name = stem
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    Some(name)
}
