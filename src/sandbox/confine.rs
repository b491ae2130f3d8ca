//! OS-level confinement of the interpreter worker, applied between fork and exec.
//!
//! Order is fixed: new session, network namespace, resource limits, credential
//! drop, then `no_new_privs`. Limits are set while still privileged so the
//! hard values cannot be raised again after the drop.

use tokio::process::Command;

use crate::config::SandboxConfig;

/// Limits for one worker process and the per-run children it forks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confinement {
    /// Address-space cap in MiB; 0 leaves it unset.
    pub memory_limit_mb: u64,
    /// CPU seconds per run, enforced inside the per-run child.
    pub cpu_limit_secs: u64,
    pub max_output_bytes: usize,
    pub open_files: u64,
    /// Credentials to drop to when started as root.
    pub unprivileged_uid: Option<u32>,
}

impl Default for Confinement {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

impl Confinement {
    pub fn from_config(cfg: &SandboxConfig) -> Self {
        Self {
            memory_limit_mb: cfg.memory_limit_mb,
            cpu_limit_secs: cfg.cpu_limit_secs,
            max_output_bytes: cfg.max_output_bytes,
            open_files: 64,
            unprivileged_uid: cfg.worker_uid(),
        }
    }

    /// The part of the limits the driver enforces on its own children.
    pub(crate) fn driver_args(&self) -> String {
        serde_json::json!({
            "cpu_secs": self.cpu_limit_secs,
            "max_output_bytes": self.max_output_bytes,
        })
        .to_string()
    }

    /// Install the pre-exec hook on `command`.
    #[cfg(target_os = "linux")]
    pub(crate) fn apply(&self, command: &mut Command) {
        let hook = linux::hook(self);
        // SAFETY: the hook only issues raw syscalls through nix; it neither
        // allocates nor touches locks held by other threads of the parent.
        unsafe {
            command.pre_exec(hook);
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub(crate) fn apply(&self, _command: &mut Command) {
        tracing::warn!(target: "sandbox", "OS confinement is only available on Linux; relying on the driver guard");
    }
}

/// Kill the whole process group led by `pid`. Errors (already gone) are ignored.
#[cfg(target_os = "linux")]
pub(crate) fn kill_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Ok(raw) = i32::try_from(pid) {
        let _ = killpg(Pid::from_raw(raw), Signal::SIGKILL);
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn kill_group(_pid: u32) {}

/// Network namespace of the current process, for comparing with the worker's.
pub(crate) fn own_net_namespace() -> Option<String> {
    std::fs::read_link("/proc/self/ns/net")
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}

#[cfg(target_os = "linux")]
mod linux {
    use std::io;

    use super::Confinement;

    use nix::sched::{unshare, CloneFlags};
    use nix::sys::prctl::set_no_new_privs;
    use nix::sys::resource::{setrlimit, Resource};
    use nix::unistd::{setgid, setgroups, setsid, setuid, Gid, Uid};

    pub(super) fn hook(limits: &Confinement) -> impl FnMut() -> io::Result<()> + Send + Sync + 'static {
        let memory = limits.memory_limit_mb.saturating_mul(1024 * 1024);
        let open_files = limits.open_files;
        let drop_to = limits.unprivileged_uid;

        move || {
            setsid()?;

            let root = Uid::effective().is_root();
            // Best effort: containers often refuse new namespaces. The driver
            // guard still refuses socket creation in that case.
            let flags = if root {
                CloneFlags::CLONE_NEWNET
            } else {
                CloneFlags::CLONE_NEWUSER | CloneFlags::CLONE_NEWNET
            };
            let _ = unshare(flags);

            if memory > 0 {
                setrlimit(Resource::RLIMIT_AS, memory, memory)?;
            }
            setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
            setrlimit(Resource::RLIMIT_FSIZE, 0, 0)?;
            setrlimit(Resource::RLIMIT_NOFILE, open_files, open_files)?;

            if root {
                if let Some(uid) = drop_to {
                    setgroups(&[])?;
                    setgid(Gid::from_raw(uid))?;
                    setuid(Uid::from_raw(uid))?;
                }
            }
            set_no_new_privs()?;
            Ok(())
        }
    }
}
