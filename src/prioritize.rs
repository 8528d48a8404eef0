//! Candidate-file selection and ordering for issue fixing.
//!
//! Files named in the issue text are analyzed first. Everything here is a
//! pure function of its inputs; the filesystem walk lives in the git
//! workspace collaborator.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

const PATH: &str = r"[A-Za-z0-9_./-]+\.[A-Za-z][A-Za-z0-9]*";

/// Extraction rules, most specific first. Each captures the path in group 1.
fn mention_rules() -> &'static [Regex] {
    static RULES: OnceLock<Vec<Regex>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            format!(r"`({PATH})`"),
            format!(r"({PATH}):\d+"),
            format!(r"(?i)({PATH})\s+line"),
            format!(r"(?i)\bin\s+({PATH})"),
            format!(r"({PATH})"),
        ]
        .iter()
        .map(|re| Regex::new(re).expect("mention rule is a valid regex"))
        .collect()
    })
}

/// Path-like tokens mentioned in free text, with leading/trailing `.` and `/` trimmed.
pub fn extract_mentioned_files(text: &str) -> BTreeSet<String> {
    let mut mentioned = BTreeSet::new();
    for rule in mention_rules() {
        for caps in rule.captures_iter(text) {
            let token = caps[1].trim_matches(|c| c == '.' || c == '/');
            if !token.is_empty() {
                mentioned.insert(token.to_string());
            }
        }
    }
    mentioned
}

/// True if `path` equals or ends with any mentioned token.
pub fn is_mentioned(path: &str, mentioned: &BTreeSet<String>) -> bool {
    mentioned
        .iter()
        .any(|m| path == m || path.ends_with(m.as_str()))
}

/// Mentioned files first, then the rest. Both groups keep their input order.
pub fn prioritize(files: Vec<String>, issue_text: &str) -> Vec<String> {
    let mentioned = extract_mentioned_files(issue_text);
    if mentioned.is_empty() {
        return files;
    }
    let (mut first, rest): (Vec<_>, Vec<_>) =
        files.into_iter().partition(|f| is_mentioned(f, &mentioned));
    if !first.is_empty() {
        tracing::info!(count = first.len(), files = ?first, "prioritizing files mentioned in issue");
    }
    first.extend(rest);
    first
}

/// Parse an ignore list: one pattern per line, blank lines and `#` comments skipped.
pub fn parse_ignore_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Whether a repo-relative path (`/`-separated) is excluded by the ignore list.
///
/// A pattern ending in `/` is a directory prefix; anything else is a glob
/// matched against the whole path and against the file name.
pub fn should_ignore(path: &str, patterns: &[String]) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    patterns.iter().any(|pattern| {
        if let Some(dir) = pattern.strip_suffix('/') {
            path.starts_with(dir)
        } else {
            glob_match(pattern, path) || glob_match(pattern, name)
        }
    })
}

/// Which files of a checkout are candidates for analysis.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    /// Extensions including the dot, e.g. `.py`.
    pub extensions: Vec<String>,
    /// Directory names skipped at any depth.
    pub excluded_dirs: Vec<String>,
    pub ignore: Vec<String>,
}

impl FileFilter {
    pub fn accepts(&self, path: &str) -> bool {
        let mut parts: Vec<&str> = path.split('/').collect();
        let Some(name) = parts.pop() else {
            return false;
        };
        if parts
            .iter()
            .any(|dir| self.excluded_dirs.iter().any(|x| x == dir))
        {
            return false;
        }
        if !self.extensions.iter().any(|ext| name.ends_with(ext.as_str())) {
            return false;
        }
        !should_ignore(path, &self.ignore)
    }
}

/// Shell-style wildcard match: `*`, `?`, `[abc]`, `[a-z]`, `[!abc]`.
/// `*` also matches `/`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    // Position of the last `*` and the text index it is currently absorbing up to.
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        let step = match p.get(pi) {
            Some('*') => {
                backtrack = Some((pi, ti));
                pi += 1;
                continue;
            }
            Some('?') => Some(pi + 1),
            Some('[') => match match_class(&p, pi, t[ti]) {
                Some((true, next)) => Some(next),
                Some((false, _)) => None,
                None => (t[ti] == '[').then_some(pi + 1),
            },
            Some(&c) => (c == t[ti]).then_some(pi + 1),
            None => None,
        };
        match (step, backtrack) {
            (Some(next), _) => {
                pi = next;
                ti += 1;
            }
            (None, Some((star, absorbed))) => {
                pi = star + 1;
                ti = absorbed + 1;
                backtrack = Some((star, absorbed + 1));
            }
            (None, None) => return false,
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

/// Match `c` against the bracket class starting at `p[start] == '['`.
/// Returns (matched, index after `]`), or None when the class is unterminated.
fn match_class(p: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = matches!(p.get(i), Some('!'));
    if negate {
        i += 1;
    }
    let mut matched = false;
    let mut first = true;
    while i < p.len() {
        if p[i] == ']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;
        if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            if p[i] <= c && c <= p[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if p[i] == c {
                matched = true;
            }
            i += 1;
        }
    }
    None
}
