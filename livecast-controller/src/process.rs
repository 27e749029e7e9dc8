//! OS process inspection and signalling
//!
//! A recorded pid alone proves nothing once the controller has restarted:
//! the OS recycles pids. A process is only treated as our encoder when its
//! start time matches the one recorded at spawn and its command looks like
//! the encoder program.

use livecast_core::dto::status::HostUsage;
use std::ffi::OsStr;
use std::path::Path;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

use crate::repository::tracking::PidMarker;

/// Allowed skew between the recorded and the observed start time
const START_TIME_TOLERANCE_SECS: u64 = 1;

/// Linux truncates `comm` to 15 bytes
const COMM_LEN: usize = 15;

/// Snapshot of a running process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cmd: Vec<String>,
    /// Seconds since the epoch
    pub start_time: u64,
}

/// Source of process table information
pub trait ProcessProbe: Send + Sync {
    /// Returns the process if it exists and has not exited
    fn inspect(&self, pid: u32) -> Option<ProcessInfo>;
}

/// [`ProcessProbe`] backed by the live OS process table
#[derive(Debug, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn inspect(&self, pid: u32) -> Option<ProcessInfo> {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        let process = system.process(pid)?;
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return None;
        }

        Some(ProcessInfo {
            pid: pid.as_u32(),
            name: process.name().to_string_lossy().into_owned(),
            cmd: process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect(),
            start_time: process.start_time(),
        })
    }
}

/// Whether `info` is the encoder described by `marker`
///
/// `program` is the configured encoder and is used when the marker predates
/// program recording.
pub fn is_encoder(info: &ProcessInfo, marker: &PidMarker, program: &str) -> bool {
    if info.pid != marker.pid {
        return false;
    }

    if let Some(recorded) = marker.started_at {
        if info.start_time.abs_diff(recorded) > START_TIME_TOLERANCE_SECS {
            return false;
        }
    }

    let program = if marker.program.is_empty() {
        program
    } else {
        marker.program.as_str()
    };
    let expected = basename(program);
    if expected.is_empty() {
        return false;
    }

    if info.name == expected
        || (expected.len() > COMM_LEN && info.name == truncate(expected, COMM_LEN))
    {
        return true;
    }

    // Interpreted or wrapped encoders show up as `sh script` or `env ffmpeg`
    info.cmd
        .iter()
        .take(2)
        .any(|arg| basename(arg) == expected)
}

fn basename(program: &str) -> &str {
    Path::new(program)
        .file_name()
        .and_then(OsStr::to_str)
        .unwrap_or(program)
}

fn truncate(s: &str, len: usize) -> &str {
    let mut end = len.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Samples global CPU and memory usage
///
/// CPU usage is a delta between two refreshes, so this blocks for
/// [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`].
pub fn sample_host_usage() -> HostUsage {
    let mut system = System::new();
    system.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_cpu_usage();
    system.refresh_memory();

    HostUsage {
        cpu_percent: system.global_cpu_usage(),
        memory_used_bytes: system.used_memory(),
        memory_total_bytes: system.total_memory(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

/// Sends `signal` to the process group led by `pid`
///
/// A group that no longer exists counts as signalled.
#[cfg(unix)]
pub fn signal_group(pid: u32, signal: Signal) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal as UnixSignal};
    use nix::unistd::Pid as UnixPid;

    let signal = match signal {
        Signal::Terminate => UnixSignal::SIGTERM,
        Signal::Kill => UnixSignal::SIGKILL,
    };
    let pgid = i32::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;

    match signal::killpg(UnixPid::from_raw(pgid), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(std::io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
pub fn signal_group(pid: u32, signal: Signal) -> std::io::Result<()> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    if let Some(process) = system.process(pid) {
        let delivered = match signal {
            Signal::Terminate => process.kill_with(sysinfo::Signal::Term).unwrap_or(false),
            Signal::Kill => process.kill(),
        };
        if !delivered {
            return Err(std::io::Error::other("signal was not delivered"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(pid: u32, started_at: Option<u64>) -> PidMarker {
        PidMarker {
            pid,
            program: "/usr/bin/ffmpeg".to_string(),
            started_at,
        }
    }

    fn info(pid: u32, name: &str, cmd: &[&str], start_time: u64) -> ProcessInfo {
        ProcessInfo {
            pid,
            name: name.to_string(),
            cmd: cmd.iter().map(|s| s.to_string()).collect(),
            start_time,
        }
    }

    #[test]
    fn test_matching_encoder() {
        let proc = info(100, "ffmpeg", &["ffmpeg", "-re"], 1000);
        assert!(is_encoder(&proc, &marker(100, Some(1000)), "ffmpeg"));
        assert!(is_encoder(&proc, &marker(100, Some(1001)), "ffmpeg"));
    }

    #[test]
    fn test_recycled_pid_is_rejected() {
        // Same pid, same name, but started long after our encoder
        let proc = info(100, "ffmpeg", &["ffmpeg"], 5000);
        assert!(!is_encoder(&proc, &marker(100, Some(1000)), "ffmpeg"));

        // Same pid, unrelated program
        let proc = info(100, "bash", &["bash"], 1000);
        assert!(!is_encoder(&proc, &marker(100, Some(1000)), "ffmpeg"));
    }

    #[test]
    fn test_wrapped_encoder_matches_by_argv() {
        let proc = info(7, "sh", &["/bin/sh", "/tmp/fake-encoder"], 10);
        let marker = PidMarker {
            pid: 7,
            program: "/tmp/fake-encoder".to_string(),
            started_at: Some(10),
        };
        assert!(is_encoder(&proc, &marker, "ffmpeg"));
    }

    #[test]
    fn test_truncated_comm_matches() {
        let proc = info(9, "very-long-encod", &[], 10);
        let marker = PidMarker {
            pid: 9,
            program: "/opt/very-long-encoder-name".to_string(),
            started_at: None,
        };
        assert!(is_encoder(&proc, &marker, "ffmpeg"));
    }

    #[test]
    fn test_legacy_marker_uses_configured_program() {
        let proc = info(11, "ffmpeg", &["ffmpeg"], 10);
        let legacy = PidMarker {
            pid: 11,
            program: String::new(),
            started_at: None,
        };
        assert!(is_encoder(&proc, &legacy, "ffmpeg"));
        assert!(!is_encoder(&proc, &legacy, "gst-launch-1.0"));
    }

    #[test]
    fn test_host_usage_is_plausible() {
        let usage = sample_host_usage();
        assert!(usage.memory_total_bytes > 0);
        assert!(usage.memory_used_bytes <= usage.memory_total_bytes);
        assert!((0.0..=100.0).contains(&usage.cpu_percent));
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_missing_group_is_ok() {
        // Linux pid_max tops out at 2^22
        assert!(signal_group(4_194_304 + 17, Signal::Terminate).is_ok());
        assert!(signal_group(4_194_304 + 17, Signal::Kill).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_out_of_range_pid_is_rejected() {
        let err = signal_group(u32::MAX, Signal::Terminate).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_system_probe_sees_current_process() {
        let probe = SystemProbe;
        let me = probe.inspect(std::process::id()).expect("own process is visible");
        assert_eq!(me.pid, std::process::id());
        assert!(me.start_time > 0);
    }
}
