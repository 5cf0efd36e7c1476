/// Color support with NO_COLOR and CLICOLOR environment variable handling
///
/// Implements the NO_COLOR standard (https://no-color.org/) and traditional
/// CLICOLOR conventions for disabling terminal colors.
///
/// **Environment Variables**:
/// - `NO_COLOR`: If set (to any value), disable colors
/// - `CLICOLOR`: If set to 0, disable colors
/// - `CLICOLOR_FORCE`: If set to non-zero, force colors even when not a TTY
///
/// `--no-color` on the command line wins over all of them.
use colored::control;

/// Decide whether to colorize, given the `--no-color` flag and a variable lookup
pub fn should_colorize<F>(no_color_flag: bool, is_tty: bool, lookup: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    if no_color_flag || lookup("NO_COLOR").is_some() {
        return false;
    }
    if lookup("CLICOLOR_FORCE").is_some_and(|v| v != "0") {
        return true;
    }
    if lookup("CLICOLOR").is_some_and(|v| v == "0") {
        return false;
    }
    is_tty
}

/// Initialize color support. Call this early in main().
pub fn init_colors(no_color_flag: bool) {
    let is_tty = std::io::IsTerminal::is_terminal(&std::io::stdout());
    control::set_override(should_colorize(no_color_flag, is_tty, |key| {
        std::env::var(key).ok()
    }));
}
