//! # Glob Matching
//!
//! Redis-style key patterns as used by `SCAN ... MATCH`.
//!
//! Supported syntax:
//! - `*` matches any run of bytes (including none)
//! - `?` matches exactly one byte
//! - `[abc]`, `[a-z]`, `[^a]` match a byte class
//! - `\x` matches `x` literally
//!
//! Matching is byte-oriented and iterative; a `*` remembers its position so
//! a failed branch resumes one byte further instead of recursing.

const SPECIAL: &[u8] = b"*?[]\\";

/// Returns true if `key` matches the glob `pattern`.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p = pattern.as_bytes();
    let s = key.as_bytes();
    let (mut pi, mut si) = (0, 0);
    // (pattern index after the last `*`, key index that `*` currently ends at)
    let mut star: Option<(usize, usize)> = None;

    while si < s.len() {
        if pi < p.len() && p[pi] == b'*' {
            while pi < p.len() && p[pi] == b'*' {
                pi += 1;
            }
            if pi == p.len() {
                return true;
            }
            star = Some((pi, si));
            continue;
        }

        if pi < p.len() {
            if let Some(next) = step(p, pi, s[si]) {
                pi = next;
                si += 1;
                continue;
            }
        }

        match star {
            Some((star_pi, star_si)) => {
                pi = star_pi;
                si = star_si + 1;
                star = Some((star_pi, star_si + 1));
            }
            None => return false,
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// Escapes every glob metacharacter so `text` only matches itself.
pub fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_ascii() && SPECIAL.contains(&(ch as u8)) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Matches one non-star pattern element against `c`.
///
/// Returns the index of the next pattern element on success.
fn step(p: &[u8], pi: usize, c: u8) -> Option<usize> {
    match p[pi] {
        b'?' => Some(pi + 1),
        b'\\' if pi + 1 < p.len() => (p[pi + 1] == c).then_some(pi + 2),
        b'[' => match match_class(p, pi, c) {
            Some((matched, next)) => matched.then_some(next),
            // Unterminated class: treat the bracket literally.
            None => (c == b'[').then_some(pi + 1),
        },
        literal => (literal == c).then_some(pi + 1),
    }
}

/// Evaluates the class starting at `p[start] == b'['`.
///
/// Returns `(matched, index after ']')`, or `None` if the class never closes.
fn match_class(p: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = p.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    loop {
        let b = *p.get(i)?;
        if b == b']' {
            return Some((matched != negate, i + 1));
        }
        if b == b'\\' && i + 1 < p.len() {
            matched |= p[i + 1] == c;
            i += 2;
        } else if i + 2 < p.len() && p[i + 1] == b'-' && p[i + 2] != b']' {
            let (lo, hi) = if b <= p[i + 2] { (b, p[i + 2]) } else { (p[i + 2], b) };
            matched |= (lo..=hi).contains(&c);
            i += 3;
        } else {
            matched |= b == c;
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_star_and_question() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("rec:*", "rec:a"));
        assert!(glob_match("rec:*", "rec:"));
        assert!(!glob_match("rec:*", "user:a"));
        assert!(glob_match("r?c:*", "rec:a"));
        assert!(!glob_match("r?c", "rc"));
        assert!(glob_match("*:v1", "rec:a:v1"));
        assert!(!glob_match("*:v1", "rec:a:v2"));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
    }

    #[test]
    fn matches_classes() {
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[ae]llo", "hillo"));
        assert!(glob_match("h[^e]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("id[0-9]", "id7"));
        assert!(!glob_match("id[0-9]", "idx"));
        assert!(glob_match("a[", "a["));
    }

    #[test]
    fn escaped_text_matches_only_itself() {
        let literal = "ns[1]*?\\";
        let pattern = escape_glob(literal);
        assert!(glob_match(&pattern, literal));
        assert!(!glob_match(&pattern, "ns1xx\\"));

        let wildcard = format!("{}*", escape_glob("a*"));
        assert!(glob_match(&wildcard, "a*1"));
        assert!(!glob_match(&wildcard, "ab1"));
    }
}
