//! # Key Formatter
//!
//! Maps record identifiers to storage keys through a template such as
//! `"rec:{record_id}"`.
//!
//! ## Template Syntax
//!
//! ```text
//! rec:{record_id}:v1
//! ^^^^ ^^^^^^^^^^^ ^^^
//! prefix placeholder suffix
//! ```
//!
//! Exactly one `{record_id}` placeholder is required. `{{` and `}}` stand for
//! literal braces. Any other `{...}` is rejected when the formatter is built,
//! so a misconfigured adapter fails at startup rather than mid-pipeline.
//!
//! ## Identifier Escaping
//!
//! Inside a key, every identifier character that is not alphanumeric is
//! written as `%XX` (one escape per UTF-8 byte). Keys therefore never carry a
//! raw `:` or `/` from an identifier, and `parse` accepts only the canonical
//! encoding. `rec:{record_id}` does not claim `rec:a:v2`, which belongs to
//! `rec:{record_id}:v2`.

use std::borrow::Cow;
use std::fmt::Write;

use rkv_common::{escape_glob, Error, RkvResult};

/// Name of the single placeholder a template must contain.
pub const RECORD_ID_PLACEHOLDER: &str = "record_id";

/// Template that uses the bare identifier as the key.
pub const DEFAULT_KEY_TEMPLATE: &str = "{record_id}";

/// Identifier formatted once at construction to prove the template works.
const SENTINEL_ID: &str = "test_id";

/// Compiled key template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFormatter {
    template: String,
    prefix: String,
    suffix: String,
    wildcard: String,
}

impl Default for KeyFormatter {
    fn default() -> Self {
        KeyFormatter {
            template: DEFAULT_KEY_TEMPLATE.to_string(),
            prefix: String::new(),
            suffix: String::new(),
            wildcard: "*".to_string(),
        }
    }
}

impl KeyFormatter {
    /// Compiles `template`, failing with `Error::Configuration` if it is not
    /// usable.
    pub fn new(template: &str) -> RkvResult<Self> {
        let invalid = |reason: String| Error::configuration(format!("key_template {template:?}"), reason);

        let mut prefix = String::new();
        let mut suffix = String::new();
        let mut seen_placeholder = false;
        let mut chars = template.chars().peekable();

        while let Some(ch) = chars.next() {
            let out = if seen_placeholder { &mut suffix } else { &mut prefix };
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => return Err(invalid("unclosed '{'".to_string())),
                        }
                    }
                    if name != RECORD_ID_PLACEHOLDER {
                        return Err(invalid(format!(
                            "unknown placeholder {{{name}}}, only {{{RECORD_ID_PLACEHOLDER}}} is supported"
                        )));
                    }
                    if seen_placeholder {
                        return Err(invalid(format!(
                            "{{{RECORD_ID_PLACEHOLDER}}} appears more than once"
                        )));
                    }
                    seen_placeholder = true;
                }
                '}' => return Err(invalid("unmatched '}'".to_string())),
                c => out.push(c),
            }
        }

        if !seen_placeholder {
            return Err(invalid(format!("missing {{{RECORD_ID_PLACEHOLDER}}} placeholder")));
        }

        let wildcard = format!("{}*{}", escape_glob(&prefix), escape_glob(&suffix));
        let formatter = KeyFormatter {
            template: template.to_string(),
            prefix,
            suffix,
            wildcard,
        };

        let sentinel_key = formatter.format(SENTINEL_ID);
        if formatter.parse(&sentinel_key).as_deref() != Some(SENTINEL_ID) {
            return Err(invalid(format!("sentinel key {sentinel_key:?} does not map back to its id")));
        }
        Ok(formatter)
    }

    /// The template this formatter was compiled from.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Produces the storage key for `record_id`.
    pub fn format(&self, record_id: &str) -> String {
        let mut key = String::with_capacity(self.prefix.len() + record_id.len() + self.suffix.len());
        key.push_str(&self.prefix);
        push_escaped(&mut key, record_id);
        key.push_str(&self.suffix);
        key
    }

    /// Glob pattern matching every key this formatter can produce.
    ///
    /// Literal parts of the template are escaped, so a `*` or `[` in a
    /// namespace never widens the match.
    pub fn wildcard(&self) -> &str {
        &self.wildcard
    }

    /// Extracts the identifier from a key produced by [`format`](Self::format).
    ///
    /// Returns `None` for keys outside this template's namespace, including
    /// keys whose middle part is not the canonical escaping of any id.
    pub fn parse<'k>(&self, key: &'k str) -> Option<Cow<'k, str>> {
        if key.len() < self.prefix.len() + self.suffix.len() {
            return None;
        }
        let encoded = key
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())?;
        let record_id = urlencoding::decode(encoded).ok()?;

        let mut canonical = String::with_capacity(encoded.len());
        push_escaped(&mut canonical, &record_id);
        (canonical == encoded).then_some(record_id)
    }
}

fn push_escaped(out: &mut String, record_id: &str) {
    let mut buf = [0u8; 4];
    for ch in record_id.chars() {
        if ch.is_alphanumeric() {
            out.push(ch);
        } else {
            for byte in ch.encode_utf8(&mut buf).bytes() {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rkv_common::glob_match;

    #[test]
    fn default_template_is_bare_id() {
        let keys = KeyFormatter::default();
        assert_eq!(keys, KeyFormatter::new(DEFAULT_KEY_TEMPLATE).unwrap());
        assert_eq!(keys.format("abc"), "abc");
        assert_eq!(keys.wildcard(), "*");
        assert_eq!(keys.parse("anything").as_deref(), Some("anything"));
    }

    #[test]
    fn formats_with_prefix_and_suffix() {
        let keys = KeyFormatter::new("rec:{record_id}:v1").unwrap();
        assert_eq!(keys.format("a"), "rec:a:v1");
        assert_eq!(keys.format(""), "rec::v1");
        assert_eq!(keys.wildcard(), "rec:*:v1");
        assert_eq!(keys.parse("rec:a:v1").as_deref(), Some("a"));
        assert_eq!(keys.parse("rec:a:v2"), None);
        assert_eq!(keys.parse("user:a:v1"), None);
        assert_eq!(keys.parse("rec:v1"), None);
    }

    #[test]
    fn format_is_deterministic() {
        let keys = KeyFormatter::new("ns/{record_id}").unwrap();
        assert_eq!(keys.format("42"), keys.format("42"));
        assert_ne!(keys.format("42"), keys.format("43"));
    }

    #[test]
    fn braces_escape_and_glob_chars_are_literal() {
        let keys = KeyFormatter::new("{{tenant*}}:{record_id}").unwrap();
        assert_eq!(keys.format("7"), "{tenant*}:7");
        assert!(glob_match(keys.wildcard(), "{tenant*}:7"));
        assert!(!glob_match(keys.wildcard(), "{tenantX}:7"));
    }

    #[test]
    fn rejects_bad_templates() {
        for template in [
            "rec:",
            "",
            "{id}",
            "{record_id}:{record_id}",
            "rec:{record_id",
            "rec:}{record_id}",
            "{}",
            "{record_id!r}",
        ] {
            let err = KeyFormatter::new(template).unwrap_err();
            assert!(matches!(err, Error::Configuration { .. }), "{template:?}");
            assert!(err.to_string().contains("key_template"), "{template:?}");
        }
    }

    #[test]
    fn escapes_separators_inside_ids() {
        let keys = KeyFormatter::new("rec:{record_id}").unwrap();
        assert_eq!(keys.format("a:v2"), "rec:a%3Av2");
        assert_eq!(keys.format("50%/x y"), "rec:50%25%2Fx%20y");
        assert_eq!(keys.format("ünï"), "rec:ünï");
        for id in ["a:v2", "50%/x y", "ünï", "w0-1", ""] {
            assert_eq!(keys.parse(&keys.format(id)).as_deref(), Some(id), "{id:?}");
        }
    }

    #[test]
    fn parse_rejects_non_canonical_ids() {
        let keys = KeyFormatter::new("rec:{record_id}").unwrap();
        // Raw separators only come from a longer template.
        assert_eq!(keys.parse("rec:a:v2"), None);
        assert_eq!(keys.parse("rec:a/b"), None);
        // Escaped alphanumerics, lowercase hex and broken escapes.
        assert_eq!(keys.parse("rec:%61"), None);
        assert_eq!(keys.parse("rec:a%3av2"), None);
        assert_eq!(keys.parse("rec:a%3"), None);
        assert_eq!(keys.parse("rec:%FF"), None);

        let bare = KeyFormatter::default();
        assert_eq!(bare.parse("rec:a"), None);
    }
}
