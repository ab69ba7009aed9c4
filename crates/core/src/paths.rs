//! Config/identity directory resolution chain, grounded in the original
//! `config.c`'s fallback order: `$XDG_CONFIG_HOME/rootstream`, then
//! `$HOME/.config/rootstream` (via `dirs::home_dir()`, the Rust
//! equivalent of the original's `getpwuid` fallback when `$HOME` is
//! unset), then finally `/tmp/rootstream-<uid>` with a warning. The
//! last tier is never an error — it "works, just isn't ideal."

use std::path::PathBuf;

use tracing::warn;

pub fn resolve_config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("rootstream");
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".config").join("rootstream");
    }

    let uid = current_uid();
    warn!(
        uid,
        "could not resolve a home directory; falling back to /tmp, not ideal but works"
    );
    PathBuf::from(format!("/tmp/rootstream-{uid}"))
}

#[cfg(unix)]
fn current_uid() -> u32 {
    nix::unistd::getuid().as_raw()
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdg_config_home_wins_when_set() {
        std::env::set_var("XDG_CONFIG_HOME", "/tmp/xdg-test-dir");
        let dir = resolve_config_dir();
        assert_eq!(dir, PathBuf::from("/tmp/xdg-test-dir/rootstream"));
        std::env::remove_var("XDG_CONFIG_HOME");
    }

    #[test]
    fn falls_back_to_home_config_when_xdg_unset() {
        std::env::remove_var("XDG_CONFIG_HOME");
        if let Some(home) = dirs::home_dir() {
            let dir = resolve_config_dir();
            assert_eq!(dir, home.join(".config").join("rootstream"));
        }
    }
}
