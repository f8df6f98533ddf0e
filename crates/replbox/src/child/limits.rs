//! Resource limit installation
//!
//! Converts [`ResourceLimits`] into `setrlimit` calls. These run inside
//! the `pre_exec` hook between fork and exec, so only async-signal-safe
//! operations are allowed here.

use std::io;

use nix::sys::resource::{Resource, setrlimit};

use crate::types::ResourceLimits;

/// Install per-process limits for the child. Called from `pre_exec`.
pub(crate) fn install(limits: &ResourceLimits) -> io::Result<()> {
    if let Some(kb) = limits.memory_limit {
        set(Resource::RLIMIT_AS, kb_to_bytes(kb))?;
    }

    if let Some(seconds) = limits.cpu_time_limit {
        set(Resource::RLIMIT_CPU, seconds)?;
    }

    if let Some(kb) = limits.file_size_limit {
        set(Resource::RLIMIT_FSIZE, kb_to_bytes(kb))?;
    }

    if let Some(count) = limits.max_processes {
        set(Resource::RLIMIT_NPROC, u64::from(count))?;
    }

    // No core dumps in workspace directories
    set(Resource::RLIMIT_CORE, 0)?;

    Ok(())
}

fn set(resource: Resource, value: u64) -> io::Result<()> {
    setrlimit(resource, value, value).map_err(|errno| io::Error::from_raw_os_error(errno as i32))
}

pub(crate) fn kb_to_bytes(kb: u64) -> u64 {
    kb.saturating_mul(1024)
}
