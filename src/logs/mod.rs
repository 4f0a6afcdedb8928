//! Log handling: the rotating writer used by the host runtime (§4.B) and
//! helpers for resolving configured log paths.

pub mod writer;

pub use writer::RotatingWriter;

use std::path::{Path, PathBuf};

/// Resolves a configured log path, expanding `%VAR%` references against
/// the process environment so `--stdout %ProgramData%\Servy\logs\out.log`
/// style paths work from the SCM image path the same way they would from
/// an interactive shell.
pub fn resolve_log_path(configured: &str) -> Option<PathBuf> {
    if configured.is_empty() {
        return None;
    }
    let env: std::collections::HashMap<String, String> = std::env::vars().collect();
    let expanded = crate::env_list::expand(configured, &env);
    Some(Path::new(&expanded).to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_path_resolves_to_none() {
        assert!(resolve_log_path("").is_none());
    }

    #[test]
    fn expands_percent_variables_in_configured_path() {
        std::env::set_var("SERVY_TEST_LOG_DIR", "C:\\ProgramData\\Servy");
        let resolved = resolve_log_path("%SERVY_TEST_LOG_DIR%\\out.log").unwrap();
        assert_eq!(resolved, Path::new("C:\\ProgramData\\Servy\\out.log"));
        std::env::remove_var("SERVY_TEST_LOG_DIR");
    }
}
