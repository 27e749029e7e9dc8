//! External encoder invocation
//!
//! Builds the ffmpeg command line for a job, spawns it in its own process
//! group with stderr captured to the job log, and reads that log back.

pub mod classify;

use livecast_core::domain::job::{Job, StreamKey};
use livecast_core::domain::quality;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Bytes read from the end of a log when classifying or tailing it
pub const LOG_TAIL_BYTES: u64 = 64 * 1024;

/// Recovery attempts the fifo muxer makes before giving up on the ingest
const MAX_RECOVERY_ATTEMPTS: u32 = 30;

/// A fully resolved encoder command line
#[derive(Clone)]
pub struct EncoderInvocation {
    pub program: String,
    pub args: Vec<String>,
    key: StreamKey,
}

impl EncoderInvocation {
    /// Spawns the encoder as the leader of a new process group
    ///
    /// The log file is created or truncated and receives the encoder's stderr.
    pub fn spawn(&self, log_path: &Path) -> std::io::Result<Child> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = std::fs::File::create(log_path)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log));

        #[cfg(unix)]
        command.process_group(0);

        command.spawn()
    }
}

/// Renders the command line with the stream key masked
impl std::fmt::Display for EncoderInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secret = self.key.expose();
        let masked = self.key.redacted();

        f.write_str(&self.program)?;
        for arg in &self.args {
            if !secret.is_empty() && arg.contains(secret) {
                write!(f, " {}", arg.replace(secret, &masked))?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for EncoderInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncoderInvocation({})", self)
    }
}

/// Ingest URL with the stream key appended
pub fn ingest_destination(ingest_url: &str, key: &StreamKey) -> String {
    format!("{}/{}", ingest_url.trim_end_matches('/'), key.expose())
}

/// Builds the encoder invocation for a job
///
/// The source is read at native rate and looped forever. Output goes through
/// the fifo muxer so a dropped ingest connection is re-established without
/// restarting the encoder.
pub fn build_invocation(program: &str, ingest_url: &str, job: &Job) -> EncoderInvocation {
    let params = quality::resolve(job.quality, job.vertical);
    let source = job.source.to_string_lossy().into_owned();
    let bitrate = format!("{}k", params.bitrate_kbps);
    let maxrate = format!("{}k", params.maxrate_kbps);
    let bufsize = format!("{}k", params.buffer_size_kbps);
    let size = params.resolution();
    let fps = params.frame_rate.to_string();
    let gop = params.keyframe_interval().to_string();
    let recovery = MAX_RECOVERY_ATTEMPTS.to_string();
    let destination = ingest_destination(ingest_url, &job.destination_key);

    let args = [
        "-hide_banner",
        "-nostdin",
        "-re",
        "-stream_loop",
        "-1",
        "-i",
        source.as_str(),
        "-map",
        "0:v:0",
        "-map",
        "0:a:0?",
        "-c:v",
        "libx264",
        "-preset",
        "veryfast",
        "-tune",
        "zerolatency",
        "-b:v",
        bitrate.as_str(),
        "-maxrate",
        maxrate.as_str(),
        "-bufsize",
        bufsize.as_str(),
        "-s",
        size.as_str(),
        "-r",
        fps.as_str(),
        "-vsync",
        "cfr",
        "-g",
        gop.as_str(),
        "-keyint_min",
        gop.as_str(),
        "-sc_threshold",
        "0",
        "-pix_fmt",
        "yuv420p",
        "-c:a",
        "aac",
        "-b:a",
        "128k",
        "-ar",
        "44100",
        "-ac",
        "2",
        "-f",
        "fifo",
        "-fifo_format",
        "flv",
        "-drop_pkts_on_overflow",
        "1",
        "-attempt_recovery",
        "1",
        "-recovery_wait_time",
        "1",
        "-max_recovery_attempts",
        recovery.as_str(),
        destination.as_str(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    EncoderInvocation {
        program: program.to_string(),
        args,
        key: job.destination_key.clone(),
    }
}

/// Reads up to `max_bytes` from the end of a log file
///
/// A missing log reads as empty.
pub fn read_log_tail(path: &Path, max_bytes: u64) -> std::io::Result<String> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
        Err(e) => return Err(e),
    };

    let len = file.metadata()?.len();
    if len > max_bytes {
        file.seek(SeekFrom::Start(len - max_bytes))?;
    }

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Last `count` non-empty lines of a log
///
/// Progress updates are separated by carriage returns, so both `\r` and
/// `\n` end a line.
pub fn tail_lines(text: &str, count: usize) -> Vec<String> {
    let lines: Vec<&str> = text
        .split(['\n', '\r'])
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let skip = lines.len().saturating_sub(count);
    lines[skip..].iter().map(|l| l.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecast_core::domain::quality::Quality;

    fn demo_job() -> Job {
        let mut job = Job::new("demo.mp4", "abcd1234");
        job.quality = Quality::High;
        job
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> &'a str {
        let pos = args.iter().position(|a| a == flag).unwrap();
        &args[pos + 1]
    }

    #[test]
    fn test_high_quality_invocation() {
        let invocation = build_invocation("ffmpeg", "rtmp://ingest.example/live2", &demo_job());
        let args = &invocation.args;

        assert_eq!(value_after(args, "-b:v"), "4500k");
        assert_eq!(value_after(args, "-maxrate"), "4500k");
        assert_eq!(value_after(args, "-bufsize"), "9000k");
        assert_eq!(value_after(args, "-s"), "1920x1080");
        assert_eq!(value_after(args, "-g"), "60");
        assert_eq!(value_after(args, "-keyint_min"), "60");
        assert_eq!(value_after(args, "-stream_loop"), "-1");
        assert_eq!(value_after(args, "-i"), "demo.mp4");
        assert_eq!(value_after(args, "-vsync"), "cfr");
        assert_eq!(
            args.last().unwrap(),
            "rtmp://ingest.example/live2/abcd1234"
        );
        assert!(args.iter().any(|a| a == "-re"));
    }

    #[test]
    fn test_display_masks_stream_key() {
        let invocation = build_invocation("ffmpeg", "rtmp://ingest.example/live2/", &demo_job());
        let rendered = invocation.to_string();

        assert!(!rendered.contains("abcd1234"));
        assert!(rendered.contains("rtmp://ingest.example/live2/abcd****"));
        assert!(!format!("{:?}", invocation).contains("abcd1234"));
    }

    #[test]
    fn test_vertical_invocation_swaps_size() {
        let mut job = demo_job();
        job.vertical = true;
        let invocation = build_invocation("ffmpeg", "rtmp://x", &job);
        assert_eq!(value_after(&invocation.args, "-s"), "1080x1920");
    }

    #[test]
    fn test_tail_lines_handles_progress_updates() {
        let text = "first\nframe=1\rframe=2\rframe=3\n\nlast\n";
        assert_eq!(tail_lines(text, 2), vec!["frame=3", "last"]);
        assert_eq!(tail_lines(text, 10).len(), 5);
        assert!(tail_lines("", 5).is_empty());
    }

    #[test]
    fn test_read_log_tail_limits_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        std::fs::write(&path, "0123456789").unwrap();

        assert_eq!(read_log_tail(&path, 4).unwrap(), "6789");
        assert_eq!(read_log_tail(&path, 100).unwrap(), "0123456789");
        assert_eq!(read_log_tail(&dir.path().join("absent.log"), 4).unwrap(), "");
    }
}
