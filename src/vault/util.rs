use anyhow::Result;
use std::time::{SystemTime, UNIX_EPOCH};

/// Return the current Unix epoch in seconds.
///
/// This is the single, canonical implementation — **do not** duplicate
/// this helper in other modules.
pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// First `max_words` whitespace-separated words of `text`, for log lines.
pub fn text_preview(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::text_preview;

    #[test]
    fn preview_takes_leading_words() {
        assert_eq!(text_preview("one two three four", 2), "one two");
    }

    #[test]
    fn preview_collapses_whitespace() {
        assert_eq!(text_preview("  a \n b\t c ", 10), "a b c");
    }

    #[test]
    fn preview_of_empty_text_is_empty() {
        assert_eq!(text_preview("", 10), "");
    }
}
