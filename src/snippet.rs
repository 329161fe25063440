//! Whitespace-collapsing shortener for summaries and context snippets.

const PLACEHOLDER: &str = "...";

/// Collapse runs of whitespace, then cut at a word boundary so the result,
/// placeholder included, is at most `width` characters.
pub fn shorten(text: &str, width: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let collapsed = words.join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }

    let budget = width.saturating_sub(PLACEHOLDER.len());
    let mut out = String::new();
    let mut len = 0usize;
    for word in words {
        let word_len = word.chars().count();
        let needed = if out.is_empty() { word_len } else { word_len + 1 };
        if len + needed > budget {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
        len += needed;
    }
    out.push_str(PLACEHOLDER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_only_collapsed() {
        assert_eq!(shorten("  credit \n institution ", 400), "credit institution");
    }

    #[test]
    fn long_text_is_cut_at_a_word() {
        assert_eq!(shorten("Hello  world, this is long", 15), "Hello world,...");
        assert_eq!(shorten("Hello  world, this is long", 14), "Hello...");
        assert!(shorten(&"loan ".repeat(200), 400).chars().count() <= 400);
    }

    #[test]
    fn single_oversized_word_becomes_placeholder() {
        assert_eq!(shorten("supercalifragilistic", 8), "...");
    }
}
