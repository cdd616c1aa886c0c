//! Output naming: template expansion, filename sanitization, and collision
//! handling.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use unicode_normalization::UnicodeNormalization;

const ILLEGAL_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const SEPARATORS: [char; 4] = ['-', '.', '_', ' '];
const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Values available to filename and folder templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateValues {
    pub date: String,
    pub community_name: String,
    pub artis: String,
    pub title: String,
    pub tag: String,
}

impl TemplateValues {
    fn lookup(&self) -> HashMap<&'static str, &str> {
        HashMap::from([
            ("date", self.date.as_str()),
            ("community_name", self.community_name.as_str()),
            ("artis", self.artis.as_str()),
            ("title", self.title.as_str()),
            ("tag", self.tag.as_str()),
        ])
    }
}

/// Expands `{field}` placeholders. Empty fields disappear together with the
/// separator run next to them, so `"{date} {artis} {title}"` with no artist
/// still yields `"240101 title"` rather than doubled spaces.
pub fn expand_template(template: &str, values: &TemplateValues) -> String {
    let lookup = values.lookup();
    let mut result = String::new();
    let mut pending_separator: Option<String> = None;
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let literal = &rest[..open];
        buffer_literal(literal, &mut result, &mut pending_separator);
        let Some(close) = rest[open..].find('}') else {
            // Unterminated brace: taken literally.
            buffer_literal(&rest[open..], &mut result, &mut pending_separator);
            rest = "";
            break;
        };
        let field = &rest[open + 1..open + close];
        let value = lookup.get(field).copied().unwrap_or_default();
        if !value.is_empty() {
            if !result.is_empty() {
                if let Some(separator) = pending_separator.take() {
                    result.push_str(&separator);
                }
            } else {
                pending_separator = None;
            }
            result.push_str(value);
        }
        rest = &rest[open + close + 1..];
    }
    buffer_literal(rest, &mut result, &mut pending_separator);
    result.trim_matches(|c| SEPARATORS.contains(&c)).to_string()
}

fn buffer_literal(literal: &str, result: &mut String, pending: &mut Option<String>) {
    if literal.is_empty() {
        return;
    }
    if literal.chars().all(|c| SEPARATORS.contains(&c)) {
        // Pure separator: held back until the next non-empty field lands.
        *pending = Some(literal.to_string());
    } else {
        if let Some(separator) = pending.take() {
            if !result.is_empty() {
                result.push_str(&separator);
            }
        }
        result.push_str(literal);
    }
}

/// NFC-normalized, filesystem-safe name. Reserved device names are renamed
/// with a leading underscore; a name that sanitizes away entirely becomes
/// `_empty_file`.
pub fn sanitize_filename(name: &str) -> String {
    let normalized: String = name.nfc().collect();
    let cleaned: String = normalized
        .chars()
        .filter(|c| !ILLEGAL_CHARS.contains(c) && !c.is_control())
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return "_empty_file".to_string();
    }

    let stem = cleaned.split('.').next().unwrap_or(cleaned);
    if RESERVED_NAMES
        .iter()
        .any(|reserved| stem.eq_ignore_ascii_case(reserved))
    {
        return format!("_{cleaned}");
    }
    cleaned.to_string()
}

/// Appends ` (N)` with the smallest N ≥ 1 until the name is free in `dir`.
pub fn resolve_collision(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let candidate = named(dir, stem, extension);
    if !candidate.exists() {
        return candidate;
    }
    let mut counter = 1u32;
    loop {
        let candidate = named(dir, &format!("{stem} ({counter})"), extension);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

fn named(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    if extension.is_empty() {
        dir.join(stem)
    } else {
        dir.join(format!("{stem}.{extension}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn values() -> TemplateValues {
        TemplateValues {
            date: "240131".into(),
            community_name: "ive".into(),
            artis: "wonyoung".into(),
            title: "fan meeting".into(),
            tag: String::new(),
        }
    }

    #[test]
    fn full_expansion() {
        let expanded = expand_template("{date} {community_name} {artis} {title}", &values());
        assert_eq!(expanded, "240131 ive wonyoung fan meeting");
    }

    #[test]
    fn empty_fields_collapse_their_separators() {
        let mut vals = values();
        vals.artis.clear();
        let expanded = expand_template("{date} {community_name} {artis} {title}", &vals);
        assert_eq!(expanded, "240131 ive fan meeting");

        vals.date.clear();
        let expanded = expand_template("{date} {community_name} {artis} {title}", &vals);
        assert_eq!(expanded, "ive fan meeting");

        let expanded = expand_template("{community_name}_{tag}_{title}", &vals);
        assert_eq!(expanded, "ive_fan meeting");
    }

    #[test]
    fn all_empty_yields_empty() {
        let expanded = expand_template("{artis} {tag}", &TemplateValues::default());
        assert_eq!(expanded, "");
    }

    #[test]
    fn sanitize_strips_illegal_and_control_chars() {
        assert_eq!(sanitize_filename("a<b>:c\"d/e\\f|g?h*i"), "abcdefghi");
        assert_eq!(sanitize_filename("line\u{0001}break\u{001f}"), "linebreak");
    }

    #[test]
    fn sanitize_normalizes_to_nfc() {
        // "e" + combining acute vs precomposed.
        let decomposed = "cafe\u{0301}";
        let sanitized = sanitize_filename(decomposed);
        assert_eq!(sanitized, "café");
    }

    #[test]
    fn reserved_device_names_get_prefixed() {
        assert_eq!(sanitize_filename("CON"), "_CON");
        assert_eq!(sanitize_filename("com1.mp4"), "_com1.mp4");
        assert_eq!(sanitize_filename("lpt9"), "_lpt9");
        assert_eq!(sanitize_filename("console"), "console");
    }

    #[test]
    fn empty_input_becomes_placeholder() {
        assert_eq!(sanitize_filename(""), "_empty_file");
        assert_eq!(sanitize_filename("???"), "_empty_file");
    }

    #[test]
    fn collision_appends_smallest_counter() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("show.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("show (1).mp4"), b"x").unwrap();
        let resolved = resolve_collision(dir.path(), "show", "mp4");
        assert_eq!(resolved.file_name().unwrap(), "show (2).mp4");

        let fresh = resolve_collision(dir.path(), "other", "mp4");
        assert_eq!(fresh.file_name().unwrap(), "other.mp4");
    }
}
