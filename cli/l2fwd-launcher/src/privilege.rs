//! Privilege elevation.
//!
//! Mounting and starting the forwarder both need root. When the launcher is
//! not already root, commands are wrapped in `sudo` as explicit argv vectors.

use nix::unistd::geteuid;
use tokio::process::Command;

use crate::config::ElevateMode;

/// Default elevation helper.
pub const SUDO: &str = "sudo";

/// Phrases sudo prints when it refuses to run a command.
const SUDO_DENIAL_MARKERS: &[&str] = &[
    "a password is required",
    "is not in the sudoers file",
    "is not allowed to",
    "incorrect password attempt",
    "a terminal is required",
    "no tty present",
    "may not run sudo",
];

/// How privileged commands are executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elevation {
    /// Run as-is with the current credentials.
    Direct,
    /// Prefix with sudo.
    Sudo {
        program: String,
        non_interactive: bool,
    },
}

impl Elevation {
    /// Resolve the elevation mode against the current effective uid.
    pub fn resolve(mode: ElevateMode, non_interactive: bool) -> Self {
        Self::for_root(mode, non_interactive, geteuid().is_root())
    }

    fn for_root(mode: ElevateMode, non_interactive: bool, is_root: bool) -> Self {
        match mode {
            ElevateMode::Never => Elevation::Direct,
            ElevateMode::Auto if is_root => Elevation::Direct,
            ElevateMode::Auto | ElevateMode::Sudo => Elevation::Sudo {
                program: SUDO.to_string(),
                non_interactive,
            },
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Elevation::Direct)
    }

    /// Full argv for running `program args...` under this elevation.
    pub fn argv(&self, program: &str, args: &[String]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 3);
        if let Elevation::Sudo {
            program: sudo,
            non_interactive,
        } = self
        {
            argv.push(sudo.clone());
            if *non_interactive {
                argv.push("-n".to_string());
            }
        }
        argv.push(program.to_string());
        argv.extend(args.iter().cloned());
        argv
    }

    /// Build a command for `program args...` under this elevation.
    pub fn command(&self, program: &str, args: &[String]) -> Command {
        let argv = self.argv(program, args);
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd
    }

    /// `sudo [-n] -v`: validates (and caches) the caller's sudo credentials
    /// without running anything. `None` when no elevation is used.
    pub fn credential_check(&self) -> Option<Vec<String>> {
        match self {
            Elevation::Direct => None,
            Elevation::Sudo {
                program,
                non_interactive,
            } => {
                let mut argv = vec![program.clone()];
                if *non_interactive {
                    argv.push("-n".to_string());
                }
                argv.push("-v".to_string());
                Some(argv)
            }
        }
    }
}

/// Whether stderr output from a sudo-wrapped command is sudo refusing to
/// run it, as opposed to the command itself failing.
pub fn is_sudo_denial(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.lines().any(|line| {
        line.trim_start().starts_with("sudo:")
            && SUDO_DENIAL_MARKERS.iter().any(|marker| line.contains(marker))
    }) || stderr.contains("is not in the sudoers file")
}
