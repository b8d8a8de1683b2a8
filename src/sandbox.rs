//! Launching one command of an execution.
//!
//! Two launchers exist. [`ProcessLauncher`] runs the toolchain directly on the
//! host, each command as the leader of its own process group so the whole
//! tree can be killed at once. [`ContainerLauncher`] runs the command inside a
//! hakoniwa container with fresh namespaces, no network and a seccomp filter.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::errors::ExecutionError;
use crate::files::gen_random_id;

/// Mount point of the workspace inside a container.
const CONTAINER_ROOT: &str = "/box";
const CONTAINER_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Environment variable tagging every process started by one step.
const STEP_MARKER_VAR: &str = "CODEBOX_STEP";
const MARKER_LENGTH: u32 = 16;
const MARKER_SWEEPS: usize = 3;
/// How long output may keep draining after a step ended at its deadline.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

const BANNED_SYSCALLS: &[&str] = &[
    "mount", "umount", "poweroff", "reboot", "socket", "bind", "connect", "listen", "sendto",
    "recvfrom",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    #[default]
    Process,
    Container,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exit status; `128 + signal` when the process was killed by a signal.
    Exited(i32),
    TimedOut,
}

#[derive(Debug)]
pub struct StepOutput {
    pub termination: Termination,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// One command to launch.
#[derive(Debug, Clone, Copy)]
pub struct Step<'a> {
    pub argv: &'a [String],
    pub workdir: &'a Path,
    pub stdin: Option<&'a str>,
    pub timeout: Duration,
}

impl Step<'_> {
    fn split(&self) -> Result<(&String, &[String]), ExecutionError> {
        self.argv.split_first().ok_or_else(|| ExecutionError::Spawn {
            program: String::new(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
        })
    }
}

#[derive(Debug, Clone)]
pub enum Launcher {
    Process(ProcessLauncher),
    Container(ContainerLauncher),
}

impl Launcher {
    pub fn new(isolation: Isolation) -> Self {
        match isolation {
            Isolation::Process => Launcher::Process(ProcessLauncher),
            Isolation::Container => Launcher::Container(ContainerLauncher),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Launcher::Process(_) => "process",
            Launcher::Container(_) => "container",
        }
    }

    /// Where the workspace at `workspace` appears to launched programs.
    pub fn visible_root(&self, workspace: &Path) -> PathBuf {
        match self {
            Launcher::Process(_) => workspace.to_path_buf(),
            Launcher::Container(_) => PathBuf::from(CONTAINER_ROOT),
        }
    }

    pub async fn launch(&self, step: Step<'_>) -> Result<StepOutput, ExecutionError> {
        match self {
            Launcher::Process(launcher) => launcher.launch(step).await,
            Launcher::Container(launcher) => launcher.launch(step).await,
        }
    }
}

/// Runs commands as plain host processes. Provides no isolation beyond the
/// per-execution working directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub async fn launch(&self, step: Step<'_>) -> Result<StepOutput, ExecutionError> {
        let (program, args) = step.split()?;
        let deadline = Instant::now() + step.timeout;
        let marker = gen_random_id(MARKER_LENGTH);

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(step.workdir)
            .env(STEP_MARKER_VAR, &marker)
            .stdin(if step.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ExecutionError::Spawn {
            program: program.clone(),
            source,
        })?;
        // The child leads its own group, so its pid is the group id.
        let mut tree = ProcessTree {
            pgid: child.id().and_then(|id| libc::pid_t::try_from(id).ok()),
            marker,
            killed: false,
        };

        if let (Some(input), Some(mut pipe)) = (step.stdin, child.stdin.take()) {
            let input = input.to_owned();
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    tracing::debug!("stdin not fully consumed: {}", e);
                }
            });
        }
        let mut stdout = tokio::spawn(read_pipe(child.stdout.take()));
        let mut stderr = tokio::spawn(read_pipe(child.stderr.take()));

        let waited = tokio::time::timeout_at(deadline.into(), child.wait()).await;
        // Background processes left by the program die either way; this also
        // closes any pipe ends they inherited.
        tree.kill();

        let mut termination = match waited {
            Ok(status) => {
                let status = status.map_err(|source| ExecutionError::Wait {
                    program: program.clone(),
                    source,
                })?;
                Termination::Exited(exit_code(status))
            }
            Err(_) => {
                tracing::warn!(program = %program, timeout = ?step.timeout, "killing timed out process tree");
                child.wait().await.map_err(|source| ExecutionError::Wait {
                    program: program.clone(),
                    source,
                })?;
                Termination::TimedOut
            }
        };

        let drain_until = deadline.max(Instant::now() + PIPE_DRAIN_GRACE);
        let drained = tokio::time::timeout_at(drain_until.into(), async {
            ((&mut stdout).await, (&mut stderr).await)
        })
        .await;

        let (stdout, stderr) = match drained {
            Ok((stdout, stderr)) => {
                let pipe_error = |source| ExecutionError::Wait {
                    program: program.clone(),
                    source,
                };
                (stdout?.map_err(pipe_error)?, stderr?.map_err(pipe_error)?)
            }
            Err(_) => {
                // Something outside the tree still holds the pipes open.
                tracing::warn!(program = %program, "output pipes still open after the deadline");
                stdout.abort();
                stderr.abort();
                termination = Termination::TimedOut;
                (Vec::new(), Vec::new())
            }
        };

        Ok(StepOutput {
            termination,
            stdout,
            stderr,
        })
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buffer).await?;
    }
    Ok(buffer)
}

/// Every process started by one step: the process group led by the step's
/// child, plus any descendant that left the group but still carries the
/// step's marker in its environment. Killed at the latest when dropped, so a
/// cancelled launch leaves nothing behind.
#[derive(Debug)]
struct ProcessTree {
    pgid: Option<libc::pid_t>,
    marker: String,
    killed: bool,
}

impl ProcessTree {
    fn kill(&mut self) {
        self.killed = true;
        kill_group(self.pgid);
        for _ in 0..MARKER_SWEEPS {
            if kill_marked(&self.marker) == 0 {
                break;
            }
        }
    }
}

impl Drop for ProcessTree {
    fn drop(&mut self) {
        if !self.killed {
            tracing::debug!(pgid = ?self.pgid, "launch cancelled; killing process tree");
            self.kill();
        }
    }
}

fn kill_group(pgid: Option<libc::pid_t>) {
    let Some(pgid) = pgid else { return };
    // SAFETY: killpg only sends a signal to the group created for this step.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(pgid, "failed to kill process group: {}", err);
        }
    }
}

/// Sends SIGKILL to every live process whose environment contains
/// `STEP_MARKER_VAR=marker`. Returns how many were signalled.
fn kill_marked(marker: &str) -> usize {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return 0;
    };
    let needle = format!("{STEP_MARKER_VAR}={marker}");

    let mut killed = 0;
    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<libc::pid_t>().ok())
        else {
            continue;
        };
        // Zombies and foreign processes read as empty or fail; both are skipped.
        let Ok(environ) = std::fs::read(entry.path().join("environ")) else {
            continue;
        };
        if environ.split(|b| *b == 0).any(|var| var == needle.as_bytes()) {
            // SAFETY: the pid carries this step's marker, so it belongs to the step.
            if unsafe { libc::kill(pid, libc::SIGKILL) } == 0 {
                killed += 1;
            }
        }
    }
    if killed > 0 {
        tracing::debug!(killed, "killed processes that left the step's group");
    }
    killed
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// Runs commands inside a hakoniwa container. The workspace is bind-mounted
/// read-write at `/box`; the rest of the host filesystem is visible read-only.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerLauncher;

impl ContainerLauncher {
    pub async fn launch(&self, step: Step<'_>) -> Result<StepOutput, ExecutionError> {
        let argv = step.argv.to_vec();
        let workdir = step.workdir.to_path_buf();
        let stdin = step.stdin.map(str::to_owned);
        let timeout = step.timeout;

        tokio::task::spawn_blocking(move || run_in_container(&argv, &workdir, stdin, timeout))
            .await?
    }
}

fn run_in_container(
    argv: &[String],
    workdir: &Path,
    stdin: Option<String>,
    timeout: Duration,
) -> Result<StepOutput, ExecutionError> {
    use hakoniwa::seccomp::{Action, Arch, Filter};
    use hakoniwa::{Container, Namespace, Stdio};
    use std::io::Write;

    let step = Step {
        argv,
        workdir,
        stdin: stdin.as_deref(),
        timeout,
    };
    let (program, args) = step.split()?;
    let program = resolve_program(program)?;

    let mut container = Container::new();
    let mut filter = Filter::new(Action::Allow);

    #[cfg(target_arch = "x86_64")]
    {
        filter.add_arch(Arch::X8664);
        filter.add_arch(Arch::X86);
        filter.add_arch(Arch::X32);
    }

    BANNED_SYSCALLS.iter().for_each(|syscall| {
        filter.add_rule(Action::Errno(libc::EPERM), syscall);
    });

    container
        .unshare(Namespace::Cgroup)
        .unshare(Namespace::Ipc)
        .unshare(Namespace::Uts)
        .unshare(Namespace::Network);
    container
        .rootfs("/")
        .map_err(|e| ExecutionError::Container(format!("unable to mount root fs: {}", e)))?;
    container.seccomp_filter(filter);
    container.bindmount_rw(&workdir.to_string_lossy(), CONTAINER_ROOT);

    let mut cmd = container.command(&program);
    cmd.current_dir(CONTAINER_ROOT)
        .args(args.to_vec())
        .env("PATH", CONTAINER_PATH)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let wall_limit = Duration::from_secs(timeout.as_secs().max(1));
    cmd.wait_timeout(wall_limit.as_secs());

    let started = Instant::now();
    let mut proc = cmd.spawn().map_err(|e| ExecutionError::Container(format!("failed to spawn `{}`: {}", program, e)))?;

    if let Some(mut pipe) = proc.stdin.take() {
        if let Some(input) = &stdin {
            if let Err(e) = pipe.write_all(input.as_bytes()) {
                tracing::debug!("stdin not fully consumed: {}", e);
            }
        }
        drop(pipe);
    }

    let output = proc
        .wait_with_output()
        .map_err(|e| ExecutionError::Container(format!("failed to wait for `{}`: {}", program, e)))?;

    let termination = container_termination(
        output.status.code,
        output.status.exit_code,
        started.elapsed(),
        wall_limit,
    );
    Ok(StepOutput {
        termination,
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// The wall-clock limit is enforced by SIGKILL on the container's init, which
/// takes the whole pid namespace with it. Only that signal, arriving once the
/// limit has passed, counts as a timeout; a regular exit never does.
/// `code` and `exit_code` are the fields of hakoniwa's `ExitStatus`; the
/// latter is only set when the program exited on its own.
fn container_termination(
    code: i32,
    exit_code: Option<i32>,
    elapsed: Duration,
    wall_limit: Duration,
) -> Termination {
    let killed = exit_code.is_none() && code == 128 + libc::SIGKILL;
    if killed && elapsed >= wall_limit {
        Termination::TimedOut
    } else {
        Termination::Exited(code)
    }
}

/// Absolute path of `program`: kept as-is when already absolute (it may only
/// exist inside the container), otherwise looked up on the host `PATH`.
fn resolve_program(program: &str) -> Result<String, ExecutionError> {
    if Path::new(program).is_absolute() {
        return Ok(program.to_string());
    }
    which::which(program)
        .map(|path| path.to_string_lossy().into_owned())
        .map_err(|e| ExecutionError::Spawn {
            program: program.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, e),
        })
}
