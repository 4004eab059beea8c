//! Terminal color helpers.

use std::io::IsTerminal;
use std::sync::OnceLock;

static NO_COLOR: OnceLock<bool> = OnceLock::new();

pub fn init(no_color_flag: bool) {
    let _ = NO_COLOR.set(
        no_color_flag || std::env::var("NO_COLOR").is_ok() || !std::io::stdout().is_terminal(),
    );
}

pub fn is_disabled() -> bool {
    *NO_COLOR.get().unwrap_or(&false)
}

mod codes {
    pub const RESET: &str = "\x1b[0m";
    pub const GREEN: &str = "\x1b[32m";
    pub const RED: &str = "\x1b[31m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const MAGENTA: &str = "\x1b[35m";
    pub const CYAN: &str = "\x1b[36m";
    pub const DIM: &str = "\x1b[90m";
    pub const BOLD: &str = "\x1b[1m";
}

/// Label colors for watched sessions, assigned by position.
const SESSION_PALETTE: [&str; 6] = [
    codes::CYAN,
    codes::MAGENTA,
    codes::YELLOW,
    codes::GREEN,
    codes::BLUE,
    codes::RED,
];

fn palette_color(index: usize) -> &'static str {
    SESSION_PALETTE[index % SESSION_PALETTE.len()]
}

pub struct Colors;

fn wrap_with_ansi(text: &str, prefixes: &[&str]) -> String {
    let prefix_len: usize = prefixes.iter().map(|prefix| prefix.len()).sum();
    let mut out = String::with_capacity(prefix_len + text.len() + codes::RESET.len());
    for prefix in prefixes {
        out.push_str(prefix);
    }
    out.push_str(text);
    out.push_str(codes::RESET);
    out
}

fn paint(text: &str, prefixes: &[&str]) -> String {
    if is_disabled() {
        text.to_string()
    } else {
        wrap_with_ansi(text, prefixes)
    }
}

impl Colors {
    pub fn success(text: &str) -> String {
        paint(text, &[codes::GREEN])
    }

    pub fn error(text: &str) -> String {
        paint(text, &[codes::RED])
    }

    pub fn info(text: &str) -> String {
        paint(text, &[codes::CYAN])
    }

    pub fn warning(text: &str) -> String {
        paint(text, &[codes::YELLOW])
    }

    pub fn dim(text: &str) -> String {
        paint(text, &[codes::DIM])
    }

    pub fn bold(text: &str) -> String {
        paint(text, &[codes::BOLD])
    }

    pub fn session_name(text: &str) -> String {
        paint(text, &[codes::BOLD, codes::CYAN])
    }
}

/// Builds the `[name]` prefix used in watch mode, colored by the session's
/// position in the watched set.
pub fn session_label(name: &str, index: usize) -> String {
    let label = format!("[{}]", name);
    paint(&label, &[codes::BOLD, palette_color(index)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colors_disabled() {
        let _ = NO_COLOR.set(true);
        assert_eq!(Colors::success("test"), "test");
        assert_eq!(Colors::error("test"), "test");
        assert_eq!(session_label("api", 3), "[api]");
    }

    #[test]
    fn test_palette_wraps_around() {
        assert_eq!(palette_color(0), palette_color(SESSION_PALETTE.len()));
        assert_ne!(palette_color(0), palette_color(1));
    }

    #[test]
    fn test_wrap_with_ansi_resets() {
        let wrapped = wrap_with_ansi("x", &[codes::BOLD, codes::CYAN]);
        assert!(wrapped.starts_with(codes::BOLD));
        assert!(wrapped.ends_with(codes::RESET));
        assert!(wrapped.contains('x'));
    }
}
