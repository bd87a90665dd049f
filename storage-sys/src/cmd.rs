// SPDX-License-Identifier: GPL-3.0-only

//! Running external utilities
//!
//! [`run`] is the only place a child process is spawned. The checked wrappers
//! turn a non-zero exit into [`SysError::ChildProcess`] carrying argv and both
//! output streams.

use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;

use tracing::debug;

use crate::config::SysConfig;
use crate::error::{Result, SysError};

/// Captured result of a finished child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit status; `None` if the child was killed by a signal
    pub status: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

pub fn render(argv: &[&str]) -> String {
    argv.join(" ")
}

/// Run `argv`, optionally feeding `stdin`, and capture everything.
///
/// The exit status is not interpreted here.
pub fn run(argv: &[&str], stdin: Option<&str>) -> Result<CommandOutput> {
    let (program, args) = argv.split_first().ok_or_else(|| SysError::Spawn {
        program: String::new(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line"),
    })?;

    debug!("running `{}`", render(argv));

    let spawn_error = |source| SysError::Spawn {
        program: program.to_string(),
        source,
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error)?;

    // Feed stdin from its own thread so a child that fills its output pipes
    // before reading everything cannot deadlock us. Dropping the handle closes it.
    let writer = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_string();
            Some(thread::spawn(move || pipe.write_all(input.as_bytes())))
        }
        _ => None,
    };

    let output = child.wait_with_output().map_err(spawn_error)?;

    if let Some(writer) = writer {
        match writer.join() {
            Ok(Ok(())) => {}
            // The child may exit without reading its input; its status says why.
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => return Err(spawn_error(e)),
            Err(_) => {
                return Err(spawn_error(std::io::Error::other("stdin writer panicked")));
            }
        }
    }

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        status: output.status.code(),
    })
}

/// Like [`run`], but a non-zero exit is an error.
pub fn run_checked(argv: &[&str], stdin: Option<&str>) -> Result<CommandOutput> {
    let output = run(argv, stdin)?;
    if !output.success() {
        return Err(SysError::ChildProcess {
            argv: argv.iter().map(|arg| arg.to_string()).collect(),
            stdout: output.stdout,
            stderr: output.stderr,
            code: output.status,
        });
    }
    Ok(output)
}

/// Checked stdout of `argv`.
pub fn output(argv: &[&str]) -> Result<String> {
    Ok(run_checked(argv, None)?.stdout)
}

/// Checked stdout of `argv` with `input` piped to its stdin.
pub fn output_with_stdin(argv: &[&str], input: &str) -> Result<String> {
    Ok(run_checked(argv, Some(input))?.stdout)
}

/// Wait for the udev event queue to drain.
pub fn udev_settle(config: &SysConfig) -> Result<()> {
    let timeout = format!("--timeout={}", config.settle_timeout().as_secs());
    run_checked(&[config.tools.udevadm.as_str(), "settle", &timeout], None)?;
    Ok(())
}

/// Run a command whose effects go through the kernel device tree, then settle.
pub fn run_and_settle(config: &SysConfig, argv: &[&str], stdin: Option<&str>) -> Result<String> {
    let output = run_checked(argv, stdin)?;
    udev_settle(config)?;
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_status() {
        let output = run(&["sh", "-c", "echo out; echo err >&2; exit 3"], None).expect("spawn");
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.status, Some(3));
        assert!(!output.success());
    }

    #[test]
    fn non_zero_exit_becomes_structured_error() {
        let err = run_checked(&["sh", "-c", "echo partial; echo broken >&2; exit 2"], None)
            .expect_err("should fail");
        match err {
            SysError::ChildProcess {
                argv,
                stdout,
                stderr,
                code,
            } => {
                assert_eq!(argv[0], "sh");
                assert_eq!(stdout, "partial\n");
                assert_eq!(stderr, "broken\n");
                assert_eq!(code, Some(2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn feeds_stdin_and_closes_it() {
        let stdout = output_with_stdin(&["cat"], "secret key\n").expect("cat");
        assert_eq!(stdout, "secret key\n");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = run(&["/nonexistent/definitely-not-here"], None).expect_err("should fail");
        assert!(matches!(err, SysError::Spawn { .. }));
    }

    #[test]
    fn formats_command_context() {
        assert_eq!(render(&["addpart", "/dev/sda", "1"]), "addpart /dev/sda 1");
    }
}
