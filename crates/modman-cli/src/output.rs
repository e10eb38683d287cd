//! Terminal rendering of catalog messages.
//!
//! Catalog templates carry `&`-prefixed colour codes. They are turned into
//! ANSI styles here; `colored` drops the styles when colour is disabled.

use colored::{Color, ColoredString, Colorize};
use modman_runtime::CommandSender;
use modman_runtime::MessageCatalog;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
struct Style {
    colour: Option<Color>,
    bold: bool,
    italic: bool,
    underline: bool,
    strikethrough: bool,
}

impl Style {
    fn apply(self, text: &str) -> ColoredString {
        let mut styled = text.normal();
        if let Some(colour) = self.colour {
            styled = styled.color(colour);
        }
        if self.bold {
            styled = styled.bold();
        }
        if self.italic {
            styled = styled.italic();
        }
        if self.underline {
            styled = styled.underline();
        }
        if self.strikethrough {
            styled = styled.strikethrough();
        }
        styled
    }

    /// Apply one code. Returns `false` for characters that are not codes.
    fn update(&mut self, code: char) -> bool {
        let colour = match code.to_ascii_lowercase() {
            '0' => Color::Black,
            '1' => Color::Blue,
            '2' => Color::Green,
            '3' => Color::Cyan,
            '4' => Color::Red,
            '5' => Color::Magenta,
            '6' => Color::Yellow,
            '7' => Color::White,
            '8' => Color::BrightBlack,
            '9' => Color::BrightBlue,
            'a' => Color::BrightGreen,
            'b' => Color::BrightCyan,
            'c' => Color::BrightRed,
            'd' => Color::BrightMagenta,
            'e' => Color::BrightYellow,
            'f' => Color::BrightWhite,
            'k' => return true,
            'l' => {
                self.bold = true;
                return true;
            }
            'm' => {
                self.strikethrough = true;
                return true;
            }
            'n' => {
                self.underline = true;
                return true;
            }
            'o' => {
                self.italic = true;
                return true;
            }
            'r' => {
                *self = Style::default();
                return true;
            }
            _ => return false,
        };
        // A colour resets the formatting codes before it.
        *self = Style {
            colour: Some(colour),
            ..Style::default()
        };
        true
    }
}

/// Replace `&` colour codes with terminal styles.
pub fn render_colours(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut style = Style::default();
    let mut segment = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '&' {
            if let Some(&code) = chars.peek() {
                let mut next = style;
                if next.update(code) {
                    chars.next();
                    if !segment.is_empty() {
                        out.push_str(&style.apply(&segment).to_string());
                        segment.clear();
                    }
                    style = next;
                    continue;
                }
            }
        }
        segment.push(c);
    }
    if !segment.is_empty() {
        out.push_str(&style.apply(&segment).to_string());
    }
    out
}

/// Console sender printing catalog messages in colour.
pub struct ColouredSender {
    catalog: Arc<MessageCatalog>,
}

impl ColouredSender {
    pub fn new(catalog: Arc<MessageCatalog>) -> Self {
        Self { catalog }
    }
}

impl CommandSender for ColouredSender {
    fn send_message(&self, prefixed: bool, key: &str, args: &[String]) {
        println!(
            "{}",
            render_colours(&self.catalog.format_coloured(prefixed, key, args))
        );
    }

    fn has_permission(&self, _permission: &str) -> bool {
        true
    }

    fn is_console(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_without_colour_drops_codes() {
        colored::control::set_override(false);
        assert_eq!(
            render_colours("&7[&aModman&7] &fAlpha &7has been enabled."),
            "[Modman] Alpha has been enabled."
        );
        assert_eq!(render_colours("fish & chips &z"), "fish & chips &z");
        assert_eq!(render_colours("trailing &"), "trailing &");
    }

    #[test]
    fn test_style_codes() {
        let mut style = Style::default();
        assert!(style.update('l'));
        assert!(style.bold);
        assert!(style.update('A'));
        assert!(!style.bold);
        assert!(matches!(style.colour, Some(Color::BrightGreen)));
        assert!(style.update('r'));
        assert!(style.colour.is_none());
        assert!(!style.update('x'));
    }
}
