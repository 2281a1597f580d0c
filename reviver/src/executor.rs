// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    io::{self, Write},
    path::PathBuf,
    process::{Command, Stdio},
    thread,
};

use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Empty command")]
    EmptyCommand,
    #[error("Program not found: {0:?}")]
    NotFound(String, #[source] io::Error),
    #[error("Failed to launch {0:?}")]
    Launch(String, #[source] io::Error),
    #[error("Failed to communicate with {0:?}")]
    Communicate(String, #[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Result of a finished command. A non-zero exit status is not an error by
/// itself. Callers decide what a status means.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    /// Exit code, or [`None`] if the process was killed by a signal.
    pub status: Option<i32>,
    /// Raw standard output.
    pub stdout: Vec<u8>,
    /// Standard output followed by standard error, lossily decoded.
    pub text: String,
}

impl Output {
    pub fn new(status: i32, text: &str) -> Self {
        Self {
            status: Some(status),
            stdout: text.as_bytes().to_vec(),
            text: text.to_owned(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.text.contains(needle)
    }

    /// Return the first line containing `needle`.
    pub fn find_line(&self, needle: &str) -> Option<&str> {
        self.text.lines().find(|line| line.contains(needle))
    }
}

/// Runs external commands. Every token is passed to the program as exactly one
/// argument, so tokens containing spaces are never split.
pub trait Executor {
    fn run(&mut self, cmd: &[&str], input: Option<&[u8]>) -> Result<Output>;

    /// Look up a program on `PATH`.
    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

/// Join tokens for log messages. This is never used for execution.
pub fn display_command(cmd: &[&str]) -> String {
    cmd.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("{arg:?}")
            } else {
                (*arg).to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs commands as host processes, blocking until they exit.
#[derive(Debug, Default)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn run(&mut self, cmd: &[&str], input: Option<&[u8]>) -> Result<Output> {
        let (program, args) = cmd.split_first().ok_or(Error::EmptyCommand)?;
        let cmd_line = display_command(cmd);

        debug!("Running: {cmd_line}");

        let mut child = Command::new(program)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    Error::NotFound((*program).to_owned(), e)
                } else {
                    Error::Launch(cmd_line.clone(), e)
                }
            })?;

        let stdin = child.stdin.take();

        // Feed stdin from a separate thread so that a child filling up its
        // stdout pipe can't deadlock against us.
        let output = thread::scope(|s| {
            let writer = match (stdin, input) {
                (Some(mut stdin), Some(data)) => Some(s.spawn(move || stdin.write_all(data))),
                _ => None,
            };

            let output = child.wait_with_output()?;

            if let Some(writer) = writer {
                match writer.join() {
                    Ok(Ok(())) => {}
                    // The child may exit without reading everything.
                    Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
                    Ok(Err(e)) => return Err(e),
                    Err(_) => return Err(io::Error::other("stdin writer panicked")),
                }
            }

            Ok(output)
        })
        .map_err(|e| Error::Communicate(cmd_line, e))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        debug!("Exit status: {:?}", output.status.code());
        trace!("Output: {text:?}");

        Ok(Output {
            status: output.status.code(),
            stdout: output.stdout,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_marker_line() {
        let output = Output::new(0, "List of devices attached\n0123456789\trecovery\n");

        assert!(output.success());
        assert_eq!(output.find_line("\trecovery"), Some("0123456789\trecovery"));
        assert_eq!(output.find_line("\tdevice"), None);
    }

    #[test]
    fn display_quotes_spaces() {
        assert_eq!(
            display_command(&["adb", "shell", "echo b >/proc/sysrq-trigger"]),
            r#"adb shell "echo b >/proc/sysrq-trigger""#,
        );
    }

    #[test]
    fn empty_command() {
        assert!(matches!(
            SystemExecutor.run(&[], None),
            Err(Error::EmptyCommand)
        ));
    }
}
