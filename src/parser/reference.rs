//! Reference extraction for Terraform attribute values.
//!
//! A string leaf is scanned in two steps, in this order:
//! 1. interpolation spans `${...}`: every dotted identifier inside a span is a
//!    candidate (quoted strings inside the span are skipped);
//! 2. only when step 1 yielded no candidate, bare dotted identifiers in the
//!    whole string are candidates if they look like an address (first segment
//!    is `module` or `data`, or starts with a letter and contains `_`).
//!
//! Candidates are then cleaned down to the canonical address they denote.
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How `module.` references are cut down to a resource address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleQualification {
    /// Any number of leading `module.<name>` pairs followed by the resource address.
    #[default]
    Nested,
    /// Exactly one module level: the first four segments.
    Single,
}

// Roots that never name a resource
const NON_RESOURCE_ROOTS: &[&str] = &["var", "local", "each", "count", "self", "path", "terraform"];
const LITERALS: &[&str] = &["true", "false", "null"];

/// Extract the cleaned, deduplicated references embedded in one string.
#[must_use]
pub fn extract_references(text: &str, mode: ModuleQualification) -> BTreeSet<String> {
    let mut candidates: Vec<&str> = Vec::new();
    for inner in interpolations(text) {
        candidates.extend(dotted_tokens(inner, true));
    }
    if candidates.is_empty() {
        candidates.extend(dotted_tokens(text, false).into_iter().filter(|t| looks_like_address(t)));
    }
    candidates.into_iter().filter_map(|c| clean_reference(c, mode)).collect()
}

/// Reduce a dotted candidate to the address of the resource it names.
///
/// Returns `None` for literals, numbers, variables/locals and anything too
/// short to be a resource address.
#[must_use]
pub fn clean_reference(candidate: &str, mode: ModuleQualification) -> Option<String> {
    let candidate = candidate.trim();
    if candidate.parse::<f64>().is_ok() {
        return None;
    }
    let segs: Vec<&str> = candidate.split('.').collect();
    if segs.len() < 2 || segs.iter().any(|s| s.is_empty()) {
        return None;
    }
    let take = match segs[0] {
        first if LITERALS.contains(&first) || NON_RESOURCE_ROOTS.contains(&first) => return None,
        "module" => match mode {
            ModuleQualification::Single => 4,
            ModuleQualification::Nested => nested_module_len(&segs)?,
        },
        "data" => 3,
        _ => 2,
    };
    if segs.len() < take {
        return None;
    }
    Some(segs[..take].join("."))
}

// Number of segments covering `module.<a>[.module.<b>...].<type>.<name>`,
// or `module...data.<type>.<name>`.
fn nested_module_len(segs: &[&str]) -> Option<usize> {
    let mut i = 0;
    while i + 1 < segs.len() && segs[i] == "module" {
        i += 2;
    }
    let rest = &segs[i.min(segs.len())..];
    match rest.first() {
        Some(&"data") if rest.len() >= 3 => Some(i + 3),
        Some(&"data") => None,
        Some(_) if rest.len() >= 2 => Some(i + 2),
        _ => None,
    }
}

/// Heuristic that keeps bare dotted words from being taken for addresses.
#[must_use]
pub fn looks_like_address(token: &str) -> bool {
    let mut segs = token.split('.');
    let Some(first) = segs.next() else { return false };
    if segs.next().is_none() {
        return false;
    }
    if first == "module" || first == "data" {
        return true;
    }
    first.starts_with(|c: char| c.is_ascii_alphabetic()) && first.contains('_')
}

/// Inner text of every `${...}` span. `$${` is an escaped literal.
fn interpolations(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'$' && bytes[i + 1] == b'$' {
            i += 2;
            continue;
        }
        if bytes[i] == b'$' && bytes[i + 1] == b'{' {
            let start = i + 2;
            let Some(end) = closing_brace(bytes, start) else { break };
            out.push(&s[start..end]);
            i = end + 1;
        } else {
            i += 1;
        }
    }
    out
}

fn closing_brace(bytes: &[u8], from: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i = skip_string(bytes, i + 1);
                continue;
            }
            b'{' => depth += 1,
            b'}' if depth == 0 => return Some(i),
            b'}' => depth -= 1,
            _ => {}
        }
        i += 1;
    }
    None
}

// Index just past the closing quote of a string starting at `from`.
fn skip_string(bytes: &[u8], from: usize) -> usize {
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn is_segment_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Dotted identifiers (`ident(.ident)+`) found in `s`.
fn dotted_tokens(s: &str, skip_quoted: bool) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if skip_quoted && b == b'"' {
            i = skip_string(bytes, i + 1);
            continue;
        }
        if is_segment_byte(b) || b == b'.' {
            let start = i;
            while i < bytes.len() && (is_segment_byte(bytes[i]) || bytes[i] == b'.') {
                i += 1;
            }
            if let Some(tok) = token_in_run(&s[start..i]) {
                out.push(tok);
            }
        } else {
            i += 1;
        }
    }
    out
}

fn token_in_run(run: &str) -> Option<&str> {
    if !run.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        return None;
    }
    let end = run.find("..").unwrap_or(run.len());
    let tok = run[..end].trim_end_matches('.');
    tok.contains('.').then_some(tok)
}
