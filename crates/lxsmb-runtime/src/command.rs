use crate::RuntimeError;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

/// Captured result of an external command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    /// Exit code; `-1` when the process was killed by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Turn a non-zero exit into `CommandFailed`.
    pub fn check(self, program: &str) -> Result<Self, RuntimeError> {
        if self.success() {
            Ok(self)
        } else {
            Err(RuntimeError::CommandFailed {
                program: program.to_owned(),
                code: self.code,
                stderr: last_line(&self.stderr),
            })
        }
    }
}

/// Run a command, optionally feeding `input` on stdin. Never fails on a
/// non-zero exit; callers decide via [`ExecOutput::check`].
pub fn capture(cmd: &mut Command, input: Option<&str>) -> Result<ExecOutput, RuntimeError> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(
        "exec: {program} {}",
        cmd.get_args()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    cmd.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let mut child = cmd.spawn().map_err(|source| RuntimeError::Spawn {
        program: program.clone(),
        source,
    })?;
    if let (Some(data), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin.write_all(data.as_bytes())?;
    }
    let output = child.wait_with_output()?;
    Ok(ExecOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a command and return its stdout, failing on a non-zero exit.
pub fn run(cmd: &mut Command) -> Result<String, RuntimeError> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    Ok(capture(cmd, None)?.check(&program)?.stdout)
}

/// Last non-empty line of a diagnostic stream, so errors stay single-line.
pub(crate) fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_owned()
}
