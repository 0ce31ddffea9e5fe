//! Kernel running as a child process.
//!
//! The installed image is spawned with the sandbox root as its working
//! directory. Commands are written to its stdin as one JSON line each; the
//! kernel answers with JSON lines on stdout and ends each command's answers
//! with an empty line. The interrupt flag is mirrored into a marker file whose
//! host path is passed in `COQPOD_INTERRUPT`.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use super::{BootContext, Kernel, KernelError};
use crate::interrupt::InterruptChannel;

pub struct ProcessKernel {
    args: Vec<String>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
}

impl ProcessKernel {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            child: None,
            stdin: None,
            stdout: None,
        }
    }
}

#[cfg(unix)]
fn make_executable(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(_path: &std::path::Path) -> std::io::Result<()> {
    Ok(())
}

impl Kernel for ProcessKernel {
    fn boot(&mut self, ctx: &BootContext) -> Result<(), KernelError> {
        let image = ctx.vfs.resolve(&ctx.image)?;
        if !image.is_file() {
            return Err(KernelError::MissingImage(ctx.image.clone()));
        }
        make_executable(&image)?;

        let stubs = ctx
            .stubs
            .iter()
            .map(|stub| ctx.vfs.resolve(stub).map(|p| p.display().to_string()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut command = Command::new(&image);
        command
            .args(&self.args)
            .current_dir(ctx.vfs.host_root())
            .env("COQPOD_LIB_ROOT", ctx.vfs.lib_root())
            .env("COQPOD_STUBS", stubs.join(":"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(marker) = ctx.interrupt.marker_path() {
            command.env("COQPOD_INTERRUPT", marker);
        }

        let mut child = command.spawn()?;
        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take().map(BufReader::new);
        tracing::info!("Kernel process started (pid {})", child.id());
        self.child = Some(child);
        Ok(())
    }

    fn post(
        &mut self,
        command: &str,
        _interrupt: &InterruptChannel,
        emit: &mut dyn FnMut(String),
    ) -> Result<(), KernelError> {
        let (Some(stdin), Some(stdout)) = (self.stdin.as_mut(), self.stdout.as_mut()) else {
            return Err(KernelError::NotBooted);
        };

        writeln!(stdin, "{}", command)?;
        stdin.flush()?;

        let mut line = String::new();
        loop {
            line.clear();
            if stdout.read_line(&mut line)? == 0 {
                return Err(KernelError::Exited);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return Ok(());
            }
            emit(trimmed.to_string());
        }
    }
}

impl Drop for ProcessKernel {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
