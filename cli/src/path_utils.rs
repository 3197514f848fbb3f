use std::path::Path;
use std::path::PathBuf;

/// Expands a leading `~` or `~/` to the home directory. Other paths are returned unchanged.
pub fn expand_tilde(path: &Path) -> PathBuf {
    expand_tilde_with_home(path, dirs::home_dir().as_deref())
}

fn expand_tilde_with_home(path: &Path, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return path.to_path_buf();
    };
    match path.to_str() {
        Some("~") => home.to_path_buf(),
        Some(text) => match text.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => path.to_path_buf(),
        },
        None => path.to_path_buf(),
    }
}

/// Renders `path` for humans, abbreviating the home directory as `~`.
pub fn display_with_tilde(path: &Path) -> String {
    display_with_home(path, dirs::home_dir().as_deref())
}

fn display_with_home(path: &Path, home: Option<&Path>) -> String {
    let relative = home.and_then(|home| path.strip_prefix(home).ok());
    match relative {
        Some(rest) if rest.as_os_str().is_empty() => "~".to_string(),
        Some(rest) => format!("~/{}", rest.display()),
        None => path.display().to_string(),
    }
}
