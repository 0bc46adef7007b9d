//! Route canonicalization.
//!
//! Every store operation keys on the canonical form of a route-like string,
//! so legacy spellings (`/diagram/index.html`, `/Diagram.HTM`, `diagram/`)
//! all land on one logical resource. Canonicalization is idempotent and
//! never fails: undecodable input degrades to the best available prior form.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// Upper bound on a canonical path, in decoded characters.
const MAX_PATH_CHARS: usize = 512;

/// Characters that must stay percent-escaped in a canonical path. Everything
/// non-ASCII is escaped as well; the crate emits upper-case hex digits.
const PATH_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'^')
    .add(b'|');

/// Map an arbitrary route string to its canonical storage form.
///
/// Returns `None` only for empty or all-whitespace input. The slash and
/// suffix rules run before and after the decode/lower/re-encode step because
/// decoding can reintroduce slashes and markup suffixes.
pub fn canonicalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut path = normalize_slashes(trimmed);
    path = strip_suffixes(path);
    path = recode(path);
    path = normalize_slashes(&path);
    path = strip_suffixes(path);
    Some(path)
}

/// Backslashes become slashes, runs of slashes collapse, and a leading slash
/// is forced.
fn normalize_slashes(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 1);
    let mut prev_slash = false;
    for ch in input.chars() {
        let ch = if ch == '\\' { '/' } else { ch };
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(ch);
    }
    if !out.starts_with('/') {
        out.insert(0, '/');
    }
    out
}

/// Apply the trailing-slash, `/index` and `.htm(l)` rules to a fixpoint, so
/// stacked suffixes (`/a/index.html/`, `/b.html.html`) fully unwind in one
/// canonicalization pass.
fn strip_suffixes(mut path: String) -> String {
    loop {
        let before = path.clone();
        path = strip_trailing_slash(path);
        path = strip_index_suffix(path);
        path = strip_markup_suffix(path);
        if path == before {
            return path;
        }
    }
}

fn strip_trailing_slash(mut path: String) -> String {
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    path
}

/// `/foo/index`, `/foo/index.htm`, `/foo/index.html` address the directory.
fn strip_index_suffix(path: String) -> String {
    let lower = path.to_ascii_lowercase();
    for suffix in ["/index.html", "/index.htm", "/index"] {
        if lower.ends_with(suffix) {
            // keep the slash so "/index" canonicalizes to the root
            let keep = path.len() - suffix.len() + 1;
            return path[..keep].to_string();
        }
    }
    path
}

/// `/foo.html` and `/foo` are the same resource.
fn strip_markup_suffix(mut path: String) -> String {
    let lower = path.to_ascii_lowercase();
    for suffix in [".html", ".htm"] {
        if lower.ends_with(suffix) {
            path.truncate(path.len() - suffix.len());
            return path;
        }
    }
    path
}

/// Percent-decode, lower-case, bound the length, then re-encode with
/// upper-case hex escapes. Input that does not decode to UTF-8 keeps its
/// escapes and is only lower-cased and bounded.
fn recode(path: String) -> String {
    match percent_decode_str(&path).decode_utf8() {
        Ok(decoded) => {
            let lowered = decoded.to_lowercase();
            let bounded = truncate_chars(&lowered, MAX_PATH_CHARS);
            utf8_percent_encode(&bounded, PATH_ESCAPES).to_string()
        }
        Err(_) => truncate_chars(&path.to_lowercase(), MAX_PATH_CHARS),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => s[..cut].to_string(),
        None => s.to_string(),
    }
}
