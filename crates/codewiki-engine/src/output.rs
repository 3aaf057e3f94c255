//! Post-processing of agent output

/// Strip a single outer code fence, if the first and last lines form one.
/// Applying it twice changes nothing beyond trailing whitespace.
pub fn fence_strip(text: &str) -> String {
    let trimmed = text.trim_end();
    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() >= 2 {
        let first = lines[0].trim();
        let last = lines[lines.len() - 1].trim();
        let opens = first == "```" || first.eq_ignore_ascii_case("```markdown");
        if opens && last == "```" {
            lines.remove(0);
            lines.pop();
            return lines.join("\n").trim_end().to_string();
        }
    }
    trimmed.to_string()
}

/// Extract the content between the first `<OVERVIEW>…</OVERVIEW>` pair.
/// Missing tags fall back to fence stripping.
pub fn extract_overview(text: &str) -> String {
    if let Some(open) = text.find("<OVERVIEW>") {
        let after = &text[open + "<OVERVIEW>".len()..];
        if let Some(close) = after.find("</OVERVIEW>") {
            return after[..close].trim().to_string();
        }
    }
    fence_strip(text)
}

/// Minimum plausible document size; anything shorter is treated as a failed
/// generation rather than written to disk.
pub const MIN_DOC_BYTES: usize = 64;

pub fn looks_like_a_document(text: &str) -> bool {
    text.trim().len() >= MIN_DOC_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_plain_fence() {
        let input = "```\n# Title\n\nBody.\n```";
        assert_eq!(fence_strip(input), "# Title\n\nBody.");
    }

    #[test]
    fn strips_markdown_fence() {
        let input = "```markdown\n# Title\n```\n";
        assert_eq!(fence_strip(input), "# Title");
    }

    #[test]
    fn leaves_inner_fences_alone() {
        let input = "# Title\n\n```rust\nfn x() {}\n```\n";
        assert_eq!(fence_strip(input), "# Title\n\n```rust\nfn x() {}\n```");
    }

    #[test]
    fn does_not_strip_unbalanced_fence() {
        let input = "```\n# Title";
        assert_eq!(fence_strip(input), "```\n# Title");
    }

    #[test]
    fn fence_strip_is_idempotent() {
        for input in [
            "```\n# A\n```",
            "```markdown\n# A\n\ntext\n```",
            "# plain",
            "",
            "```rust\ncode\n```",
        ] {
            let once = fence_strip(input);
            assert_eq!(fence_strip(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn overview_tags_are_extracted() {
        let input = "noise\n<OVERVIEW>\n# Repo\n\nText.\n</OVERVIEW>\ntrailing";
        assert_eq!(extract_overview(input), "# Repo\n\nText.");
    }

    #[test]
    fn missing_tags_fall_back_to_fence_strip() {
        let input = "```\n# Repo\n```";
        assert_eq!(extract_overview(input), "# Repo");
    }

    #[test]
    fn short_output_is_not_a_document() {
        assert!(!looks_like_a_document("# A"));
        assert!(looks_like_a_document(&format!("# A\n\n{}", "word ".repeat(20))));
    }
}
