//! ffmpeg / ffprobe adapter for clip duration probing and trimming.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use vkpub_core::{errors::Error, ports::MediaTranscoder, Result};

const STDERR_TAIL_MAX_CHARS: usize = 2000;

/// Fully resolved external command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// `ffprobe` printing only the container duration in seconds.
pub fn probe_invocation(ffprobe: &Path, input: &Path) -> Invocation {
    Invocation {
        program: ffprobe.to_path_buf(),
        args: vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            input.display().to_string(),
        ],
    }
}

/// Re-encode the first `keep` of `input` into an mp4 at `output`.
pub fn trim_invocation(ffmpeg: &Path, input: &Path, output: &Path, keep: Duration) -> Invocation {
    let keep_secs = keep.as_secs().to_string();
    let mut args: Vec<String> = vec!["-y".into(), "-i".into(), input.display().to_string()];
    args.extend(
        [
            "-t",
            keep_secs.as_str(),
            "-c:v",
            "libx264",
            "-c:a",
            "aac",
            "-b:v",
            "3000k",
            "-preset",
            "ultrafast",
            "-f",
            "mp4",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(output.display().to_string());
    Invocation {
        program: ffmpeg.to_path_buf(),
        args,
    }
}

/// Parse ffprobe's bare `format=duration` output.
pub fn parse_duration(stdout: &str) -> Result<Duration> {
    let raw = stdout.lines().next().unwrap_or("").trim();
    let secs: f64 = raw
        .parse()
        .map_err(|_| Error::MediaProcessing(format!("unexpected ffprobe output: {raw:?}")))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(Error::MediaProcessing(format!("invalid duration {secs}")));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn tail(s: &str) -> String {
    let n = s.chars().count();
    if n <= STDERR_TAIL_MAX_CHARS {
        return s.trim().to_string();
    }
    s.chars().skip(n - STDERR_TAIL_MAX_CHARS).collect::<String>().trim().to_string()
}

async fn run(inv: &Invocation) -> Result<String> {
    debug!("running {} {}", inv.program.display(), inv.args.join(" "));
    let out = Command::new(&inv.program)
        .args(&inv.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            Error::MediaProcessing(format!("failed to start {}: {e}", inv.program.display()))
        })?;

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(Error::MediaProcessing(format!(
            "{} exited with {}: {}",
            inv.program.display(),
            out.status,
            tail(&stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

#[derive(Clone, Debug)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

#[async_trait]
impl MediaTranscoder for FfmpegTranscoder {
    async fn probe_duration(&self, path: &Path) -> Result<Duration> {
        let stdout = run(&probe_invocation(&self.ffprobe, path)).await?;
        parse_duration(&stdout)
    }

    async fn trim(&self, path: &Path, keep: Duration) -> Result<()> {
        let mut scratch = path.as_os_str().to_owned();
        scratch.push(".trim.mp4");
        let scratch = PathBuf::from(scratch);

        let result = run(&trim_invocation(&self.ffmpeg, path, &scratch, keep)).await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&scratch).await;
            return Err(e);
        }
        tokio::fs::rename(&scratch, path).await?;
        Ok(())
    }
}
