use std::borrow::Cow;

/// Wrap width handed to html2text. Previews are stored unwrapped, so this only
/// needs to exceed any realistic paragraph length.
const PLAIN_TEXT_WIDTH: usize = 10_000;

/// Derives the plain-text preview of a provider-native markup field.
///
/// Tags are dropped and entities decoded by `html2text`; the result is then
/// trimmed line by line, runs of blank lines collapse to one, and control
/// characters are removed. Input that html2text refuses to render falls back
/// to the control-stripped raw text.
///
/// # Examples
///
/// ```
/// use scribe::util::html_to_text;
///
/// let text = html_to_text("<p>Kickflip &amp; heelflip</p>");
/// assert!(text.contains("Kickflip & heelflip"));
/// assert!(!text.contains('<'));
/// ```
pub fn html_to_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    // html2text drops a bare ESC but keeps the rest of the sequence, so
    // escapes must go before rendering
    let html = strip_control_chars(html);
    let rendered = match html2text::from_read(html.as_bytes(), PLAIN_TEXT_WIDTH) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(error = %e, "html2text failed, keeping raw text");
            html.to_string()
        }
    };

    let mut out = String::with_capacity(rendered.len());
    let mut blank_run = false;
    for line in rendered.lines().map(str::trim) {
        if line.is_empty() {
            blank_run = !out.is_empty();
            continue;
        }
        if blank_run {
            out.push_str("\n\n");
        } else if !out.is_empty() {
            out.push('\n');
        }
        blank_run = false;
        out.push_str(line);
    }

    strip_control_chars(&out).into_owned()
}

/// Strips ASCII control characters and ANSI escape sequences.
///
/// Provider titles and descriptions are attacker-controlled and end up in
/// terminal output, so CSI (`ESC [ ... final`) and OSC (`ESC ] ... BEL|ST`)
/// sequences are removed whole. Tab, newline and carriage return are kept.
///
/// Returns `Cow::Borrowed` when nothing needs stripping.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\x1b' {
            if !is_stripped(c) {
                out.push(c);
            }
            continue;
        }
        match chars.peek() {
            Some('[') => {
                chars.next();
                // parameter bytes run until a final byte in 0x40..=0x7e
                for p in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&p) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                while let Some(p) = chars.next() {
                    if p == '\x07' {
                        break;
                    }
                    if p == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    Cow::Owned(out)
}

fn is_stripped(c: char) -> bool {
    c == '\x1b' || c == '\x7f' || (c < '\x20' && !matches!(c, '\t' | '\n' | '\r'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text_strips_tags_and_entities() {
        let text = html_to_text("<div><p>New part from <b>Tyshawn</b> &amp; friends</p></div>");
        assert!(!text.contains('<'));
        assert!(text.contains("Tyshawn"));
        assert!(text.contains("&"));
        assert!(!text.contains("&amp;"));
    }

    #[test]
    fn test_html_to_text_removes_escape_sequences_whole() {
        assert_eq!(html_to_text("<p>Kick\x1b[2Jflip</p>"), "Kickflip");
        assert_eq!(html_to_text("Bad\x1b[31m title\x07"), "Bad title");
        assert_eq!(html_to_text("\x1b]0;pwned\x07Clean"), "Clean");
    }

    #[test]
    fn test_html_to_text_empty_input() {
        assert_eq!(html_to_text(""), "");
        assert_eq!(html_to_text("   \n "), "");
    }

    #[test]
    fn test_html_to_text_plain_passthrough() {
        assert_eq!(html_to_text("Just a title"), "Just a title");
    }

    #[test]
    fn test_html_to_text_collapses_blank_lines() {
        let text = html_to_text("<p>one</p><p></p><p></p><p>two</p>");
        assert!(text.starts_with("one"));
        assert!(text.ends_with("two"));
        assert!(!text.contains("\n\n\n"));
    }

    #[test]
    fn test_strip_clean_text_returns_borrowed() {
        let input = "Hello, world!\n\tIndented";
        let result = strip_control_chars(input);
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, input);
    }

    #[test]
    fn test_strip_control_chars_removes_controls() {
        let result = strip_control_chars("he\x00ll\x07o\x08 wor\x7fld");
        assert_eq!(result, "hello world");
    }

    #[test]
    fn test_strip_ansi_sequences() {
        assert_eq!(strip_control_chars("\x1b[31mRed\x1b[0m"), "Red");
        assert_eq!(strip_control_chars("\x1b]0;title\x07safe"), "safe");
        assert_eq!(strip_control_chars("\x1b]0;title\x1b\\safe"), "safe");
        assert_eq!(strip_control_chars("bare\x1besc"), "bareesc");
    }

    #[test]
    fn test_strip_unicode_preserved() {
        assert_eq!(strip_control_chars("日本 \x1b[1m語\x1b[0m"), "日本 語");
    }
}
