use std::path::Path;

use nix::unistd::geteuid;

use crate::network::{NetworkError, Result};
use crate::paths::{IPV4_FORWARD, MACHINES_STATE_DIR};

/// Verify the host can run the network daemon.
///
/// Checks for root, the external tools, the forwarding sysctl and the
/// machined state directory. Collects all failures and returns them in a
/// single `Unavailable` error.
pub fn check_prerequisites() -> Result<()> {
    let mut errors = Vec::new();

    check_root(&mut errors);
    check_required_commands(&["ip", "machinectl"], &mut errors);
    check_path_exists(Path::new(IPV4_FORWARD), "IPv4 forwarding sysctl", &mut errors);
    check_path_exists(
        Path::new(MACHINES_STATE_DIR),
        "machined state directory (is systemd-machined running?)",
        &mut errors,
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(NetworkError::Unavailable(errors.join("; ")))
    }
}

fn check_root(errors: &mut Vec<String>) {
    if !geteuid().is_root() {
        errors.push("root privileges required for network configuration".to_string());
    }
}

fn check_required_commands(commands: &[&str], errors: &mut Vec<String>) {
    for cmd in commands {
        if which::which(cmd).is_err() {
            errors.push(format!("required command not found: {cmd}"));
        }
    }
}

fn check_path_exists(path: &Path, label: &str, errors: &mut Vec<String>) {
    if !path.exists() {
        errors.push(format!("{label} not found: {}", path.display()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_command_is_reported() {
        let mut errors = Vec::new();
        check_required_commands(&["sh", "definitely-not-a-real-binary-xyz"], &mut errors);
        assert_eq!(
            errors,
            ["required command not found: definitely-not-a-real-binary-xyz"]
        );
    }

    #[test]
    fn missing_path_is_reported_with_label() {
        let dir = tempfile::tempdir().unwrap();
        let mut errors = Vec::new();
        check_path_exists(dir.path(), "state", &mut errors);
        assert!(errors.is_empty());

        check_path_exists(&dir.path().join("gone"), "state", &mut errors);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("state not found: "), "{errors:?}");
    }
}
