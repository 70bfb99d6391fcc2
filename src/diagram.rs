//! Preparation of generated diagram code before it is rendered.

/// Strip markdown code fences around generated code.
///
/// Removes an opening fence (with its info string, e.g. `python` or `dot`),
/// a closing fence, and the surrounding whitespace. Text without fences is
/// only trimmed.
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.strip_suffix("```").unwrap_or(trimmed).trim();
    };
    let body = match rest.split_once('\n') {
        Some((info, body)) if is_info_string(info) => body,
        _ => rest,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn is_info_string(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_fences_are_removed_without_other_changes() {
        assert_eq!(strip_fences("```digraph{A->B}```"), "digraph{A->B}");
    }

    #[test]
    fn info_string_line_is_dropped() {
        let text = "```python\nfrom pytm import TM\ntm = TM(\"x\")\n```\n";
        assert_eq!(strip_fences(text), "from pytm import TM\ntm = TM(\"x\")");

        let text = "```\ndigraph G {\n  a -> b\n}\n```";
        assert_eq!(strip_fences(text), "digraph G {\n  a -> b\n}");
    }

    #[test]
    fn unfenced_text_is_only_trimmed() {
        assert_eq!(strip_fences("  digraph { a -> b }\n"), "digraph { a -> b }");
        assert_eq!(strip_fences(""), "");
    }

    #[test]
    fn code_on_the_opening_line_is_kept() {
        assert_eq!(
            strip_fences("```digraph G {\n a -> b\n}```"),
            "digraph G {\n a -> b\n}"
        );
    }

    #[test]
    fn dangling_closing_fence_is_removed() {
        assert_eq!(strip_fences("digraph{A->B}\n```"), "digraph{A->B}");
    }
}
