//! Parsing and expansion for the `Name=Value` environment variable lists
//! used by `ServiceDefinition.environment_variables`, the pre-launch hook,
//! and the host runtime's `--env` option (spec §3, §6).

use std::collections::HashMap;

/// A single `Name=Value` entry, in the order it appeared in the source list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    /// Variable name.
    pub name: String,
    /// Raw value, prior to `%VAR%` expansion.
    pub value: String,
}

/// Parses a semicolon-or-newline separated list of `K=V` pairs. `=`, `;`,
/// `"`, and `\` may be escaped as `\=`, `\;`, `\"`, `\\`. Later entries for
/// the same name win; order of first appearance per distinct name is not
/// preserved beyond "later wins" — callers needing ordered application
/// should iterate `parse` in order and let later assignments overwrite
/// earlier ones in their own layering map.
pub fn parse(input: &str) -> Vec<EnvEntry> {
    let mut entries = Vec::new();
    for raw in split_unescaped(input) {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        if let Some((name, value)) = split_assignment(raw) {
            entries.push(EnvEntry {
                name: unescape(name),
                value: unescape(value),
            });
        }
    }
    entries
}

/// Splits `input` on unescaped `;` or newline characters.
fn split_unescaped(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ';' | '\n' | '\r' => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Splits `raw` on the first unescaped `=`.
fn split_assignment(raw: &str) -> Option<(&str, &str)> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == b'=' {
            return Some((&raw[..i], &raw[i + 1..]));
        }
        i += 1;
    }
    None
}

/// Resolves `\= \; \" \\` escapes in a single parsed segment.
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next @ ('=' | ';' | '"' | '\\')) => out.push(next),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Escapes `=`, `;`, `"`, `\` in `value` for round-tripping through `parse`.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '=' | ';' | '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Builds the layered environment: starts from `base` (typically the
/// process environment), applies `entries` left-to-right (later entries for
/// the same name win), then expands `%VAR%` references against the layer
/// built so far, left-to-right over the entries.
pub fn layer(base: &HashMap<String, String>, entries: &[EnvEntry]) -> HashMap<String, String> {
    let mut layered = base.clone();
    for entry in entries {
        layered.insert(entry.name.clone(), entry.value.clone());
    }

    for entry in entries {
        let expanded = expand(&entry.value, &layered);
        layered.insert(entry.name.clone(), expanded);
    }

    layered
}

/// Expands `%VAR%` references in `value` against `env`, left to right.
/// Unknown references are left untouched (a lone `%` or an unmatched
/// `%NAME%` with no entry in `env` passes through literally).
pub fn expand(value: &str, env: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(end) = value[i + 1..].find('%') {
                let name = &value[i + 1..i + 1 + end];
                if !name.is_empty() {
                    if let Some(resolved) = env.get(name) {
                        out.push_str(resolved);
                        i = i + 1 + end + 1;
                        continue;
                    }
                }
            }
        }
        let ch = value[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}
