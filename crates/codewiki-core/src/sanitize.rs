//! Module-name → filesystem-basename mapping

/// Longest sanitized name in bytes. Leaves room for a collision suffix and
/// the `.md` extension on every mainstream filesystem.
const MAX_BASENAME_BYTES: usize = 120;

/// Map a human-readable module name to a safe file basename.
///
/// Lowercases, replaces every run of characters outside `[a-z0-9_-]` with a
/// single `_`, collapses repeated `_`, and truncates to 120 bytes. The result
/// is a fixed point: `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_underscore = false;
    for ch in name.chars().flat_map(|c| c.to_lowercase()) {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '-' {
            last_underscore = false;
            ch
        } else if ch == '_' || !last_underscore {
            last_underscore = true;
            '_'
        } else {
            continue;
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        if out.len() + mapped.len_utf8() > MAX_BASENAME_BYTES {
            break;
        }
        out.push(mapped);
    }
    if out.is_empty() {
        out.push_str("module");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_replaces() {
        assert_eq!(sanitize("HTTP Gateway"), "http_gateway");
        assert_eq!(sanitize("core::parser"), "core_parser");
        assert_eq!(sanitize("a/b\\c"), "a_b_c");
    }

    #[test]
    fn collapses_runs() {
        assert_eq!(sanitize("a   b"), "a_b");
        assert_eq!(sanitize("a__b"), "a_b");
        assert_eq!(sanitize("a .. b"), "a_b");
    }

    #[test]
    fn keeps_dash_and_underscore() {
        assert_eq!(sanitize("wire-codec_v2"), "wire-codec_v2");
    }

    #[test]
    fn empty_becomes_module() {
        assert_eq!(sanitize(""), "module");
        assert_eq!(sanitize("???"), "_");
    }

    #[test]
    fn truncates_to_120_bytes() {
        let long = "x".repeat(500);
        assert_eq!(sanitize(&long).len(), 120);
    }

    #[test]
    fn idempotent() {
        for name in ["HTTP Gateway", "a//b", "x_y-z", "Ünïcode names!", ""] {
            let once = sanitize(name);
            assert_eq!(sanitize(&once), once, "not a fixed point: {name:?}");
        }
        let long = "Ab ".repeat(200);
        let once = sanitize(&long);
        assert_eq!(sanitize(&once), once);
    }
}
