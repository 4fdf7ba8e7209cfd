//! Structured key=value progress lines.
//!
//! Every line is machine-greppable: a fixed `CHANVAULT_<LEVEL>` prefix, an
//! `event=` tag, then caller-supplied fields. Values are sanitized so one
//! record always stays on one line.

fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if !ch.is_control() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

fn emit(level: &str, event: &str, fields: &[(&str, String)], to_stderr: bool) {
    let mut line = format!("CHANVAULT_{level} event={}", sanitize_value(event));
    for (key, value) in fields {
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(&sanitize_value(value));
    }
    if to_stderr {
        eprintln!("{line}");
    } else {
        println!("{line}");
    }
}

pub fn info(event: &str, fields: &[(&str, String)]) {
    emit("INFO", event, fields, false);
}

pub fn warn(event: &str, fields: &[(&str, String)]) {
    emit("WARN", event, fields, true);
}

pub fn error(event: &str, fields: &[(&str, String)]) {
    emit("ERROR", event, fields, true);
}

#[cfg(test)]
mod tests {
    use super::sanitize_value;

    #[test]
    fn sanitize_value_rewrites_whitespace() {
        assert_eq!(sanitize_value("two words\there"), "two_words_here");
    }

    #[test]
    fn sanitize_value_falls_back_for_empty() {
        assert_eq!(sanitize_value("   "), "na");
    }

    #[test]
    fn sanitize_value_keeps_unicode_text() {
        assert_eq!(sanitize_value("café ☕"), "café_☕");
    }
}
