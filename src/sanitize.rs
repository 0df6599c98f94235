//! Text sanitization boundary.
//!
//! Everything that ends up in an HTML page goes through [`escape_html`]. Highlight
//! fragments from the search API arrive either with `@HIGHLIGHT_START@`/`@HIGHLIGHT_END@`
//! markers or with `<em>` tags; [`highlight_parts`] splits both into text spans flagged
//! as marked or not. The log text itself is never rewritten.

pub const HIGHLIGHT_START: &str = "@HIGHLIGHT_START@";
pub const HIGHLIGHT_END: &str = "@HIGHLIGHT_END@";

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Replaces control characters so a value stays on one terminal line.
pub fn terminal_safe(input: &str) -> String {
    input
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect()
}

/// Splits a highlight fragment into `(text, marked)` spans.
///
/// Only the highlight markers are consumed. Every other character of the log text is kept
/// as-is; escaping happens later in [`escape_html`].
pub fn highlight_parts(fragment: &str) -> Vec<(String, bool)> {
    let normalized = fragment.replace("<em>", HIGHLIGHT_START).replace("</em>", HIGHLIGHT_END);

    let mut parts: Vec<(String, bool)> = Vec::new();
    let mut push = |text: &str, marked: bool| {
        if text.is_empty() {
            return;
        }
        match parts.last_mut() {
            Some((last, last_marked)) if *last_marked == marked => last.push_str(text),
            _ => parts.push((text.to_string(), marked)),
        }
    };

    let mut rest = normalized.as_str();
    while let Some(start) = rest.find(HIGHLIGHT_START) {
        push(&rest[..start].replace(HIGHLIGHT_END, ""), false);
        let after = &rest[start + HIGHLIGHT_START.len()..];
        match after.find(HIGHLIGHT_END) {
            Some(end) => {
                push(&after[..end], true);
                rest = &after[end + HIGHLIGHT_END.len()..];
            }
            None => {
                push(after, true);
                rest = "";
            }
        }
    }
    push(&rest.replace(HIGHLIGHT_END, ""), false);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("plain", "plain")]
    #[case("<script>alert('x')</script>", "&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;")]
    #[case("a & \"b\"", "a &amp; &quot;b&quot;")]
    fn escapes_markup(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(escape_html(input), expected);
    }

    #[test]
    fn splits_marker_fragments() {
        let parts = highlight_parts("GET @HIGHLIGHT_START@/login@HIGHLIGHT_END@ 500");
        assert_eq!(
            parts,
            vec![
                ("GET ".to_string(), false),
                ("/login".to_string(), true),
                (" 500".to_string(), false),
            ]
        );
    }

    #[test]
    fn em_tags_mark_spans_and_keep_other_markup() {
        let parts = highlight_parts("a <em>&lt;b&gt;</em> <i>c</i>");
        assert_eq!(
            parts,
            vec![
                ("a ".to_string(), false),
                ("&lt;b&gt;".to_string(), true),
                (" <i>c</i>".to_string(), false),
            ]
        );
    }

    #[test]
    fn log_text_with_brackets_and_entities_survives() {
        let raw = "if a<b && c>d then x &amp; y";
        let parts = highlight_parts("if a<b && c>d then <em>x</em> &amp; y");
        let text: String = parts.iter().map(|(text, _)| text.as_str()).collect();
        assert_eq!(text, raw);
        assert_eq!(parts[1], ("x".to_string(), true));
    }

    #[test]
    fn unbalanced_markers_do_not_leak() {
        let plain = |fragment: &str| -> String {
            highlight_parts(fragment).into_iter().map(|(text, _)| text).collect()
        };
        assert_eq!(plain("x@HIGHLIGHT_START@y"), "xy");
        assert_eq!(plain("x@HIGHLIGHT_END@y"), "xy");
        assert_eq!(plain("x</em>y"), "xy");
        assert_eq!(highlight_parts(""), Vec::<(String, bool)>::new());
    }

    #[test]
    fn terminal_safe_flattens_control_chars() {
        assert_eq!(terminal_safe("a\nb\tc"), "a b c");
    }
}
