use anyhow::{Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};

use crate::common::shell::shell_quote;
use crate::ui::prelude::*;

/// Runs commands that change the device. In dry-run mode the command is
/// printed and reported as successful instead.
pub struct CommandExecutor {
    pub dry_run: bool,
}

impl CommandExecutor {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub fn run(&self, command: &mut Command) -> Result<()> {
        if self.dry_run {
            self.print_dry_run(command, None);
            return Ok(());
        }

        emit(Level::Debug, "exec.run", &format!("$ {}", describe(command)), None);
        let output = command
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to start {}", describe(command)))?;
        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                describe(command),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    pub fn run_with_input(&self, command: &mut Command, input: &str) -> Result<()> {
        if self.dry_run {
            self.print_dry_run(command, Some(input));
            return Ok(());
        }

        emit(Level::Debug, "exec.run", &format!("$ {}", describe(command)), None);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped()) // Capture output to avoid clutter
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to start {}", describe(command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                describe(command),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// Run a command whose exit status carries meaning beyond pass/fail
    /// and return that status. Dry runs report 0.
    pub fn run_status(&self, command: &mut Command) -> Result<i32> {
        if self.dry_run {
            self.print_dry_run(command, None);
            return Ok(0);
        }

        emit(Level::Debug, "exec.run", &format!("$ {}", describe(command)), None);
        let output = command
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to start {}", describe(command)))?;
        output
            .status
            .code()
            .with_context(|| format!("{} was terminated by a signal", describe(command)))
    }

    fn print_dry_run(&self, command: &Command, input: Option<&str>) {
        let cmd_str = describe(command);

        let message = match input {
            Some(input_str) if input_str.contains('\n') => {
                format!(
                    "[DRY RUN] {} <<EOF\n{}\nEOF",
                    cmd_str,
                    input_str.trim_end()
                )
            }
            Some(input_str) => format!("[DRY RUN] echo {} | {}", shell_quote(input_str), cmd_str),
            None => format!("[DRY RUN] {}", cmd_str),
        };
        emit(Level::Info, "exec.dry_run", &message, None);
    }
}

/// Shell-like rendering of a command for logs and error messages.
pub fn describe(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| shell_quote(&part.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ")
}
