//! File naming for sources and derived summary files.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

/// Longest sanitized base name.
pub const MAX_NAME_LEN: usize = 100;

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_=.,-]").unwrap())
}

/// Replace every character outside the safe set with `_` and cap the length.
pub fn sanitize_filename(name: &str) -> String {
    unsafe_chars()
        .replace_all(name, "_")
        .chars()
        .take(MAX_NAME_LEN)
        .collect()
}

/// Name of the derived file holding depth `depth` of `original`.
pub fn derived_name(original: &str, depth: u32) -> String {
    format!("{}.d{}", sanitize_filename(original), depth)
}

/// Whether `candidate` is a derived file of `original`, i.e.
/// `<original>.d<depth>` with or without a collision suffix.
pub fn is_derived_name(candidate: &str, original: &str) -> bool {
    let Some(rest) = candidate
        .strip_prefix(original)
        .and_then(|r| r.strip_prefix(".d"))
    else {
        return false;
    };
    let (depth, suffix) = match rest.split_once('-') {
        Some((depth, suffix)) => (depth, Some(suffix)),
        None => (rest, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    all_digits(depth) && suffix.map_or(true, all_digits)
}

/// First free name in `dir` among `base`, `base-1`, `base-2`, ...
pub fn unique_name(dir: &Path, base: &str) -> (String, PathBuf) {
    let mut n = 0usize;
    loop {
        let name = if n == 0 {
            base.to_string()
        } else {
            format!("{}-{}", base, n)
        };
        let path = dir.join(&name);
        if !path.exists() {
            return (name, path);
        }
        n += 1;
    }
}

/// Create a new, empty file under the first free name for `base`.
///
/// Another writer may claim a name between the check and the create, so a
/// lost race moves on to the next suffix.
pub fn create_unique(dir: &Path, base: &str) -> std::io::Result<(String, PathBuf, File)> {
    loop {
        let (name, path) = unique_name(dir, base);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((name, path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}
