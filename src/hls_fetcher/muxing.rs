//! ffmpeg muxing fallback backend: remuxes the HLS stream directly via
//! `-c copy`, no transcode. Progress line format (`out_time=`, `speed=`,
//! `size=`) grounded on `original_source/download_manager.py`'s
//! `FFmpegProgress` class; `Command` construction idiom grounded on the
//! teacher's `ingestion/converter.rs::convert_to_ogg`.

use super::sanitize::sanitize_filename;
use super::trait_def::{FetchProgress, HlsFetcher, ProgressCallback};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Assumed total duration (seconds) when no `duration_hint` is supplied,
/// used to turn ffmpeg's absolute `out_time` into a progress fraction.
const NOMINAL_DURATION_SECS: f64 = 2700.0;
const PROGRESS_THROTTLE: Duration = Duration::from_millis(1500);

pub struct MuxingFetcher {
    ffmpeg_path: PathBuf,
}

impl MuxingFetcher {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self { ffmpeg_path }
    }
}

/// Running state accumulated from ffmpeg's `-progress pipe:1` key=value
/// stream, which arrives one key per line rather than one line per update.
#[derive(Default)]
struct MuxProgressState {
    out_time_secs: Option<f64>,
    speed: Option<String>,
    total_size: Option<String>,
}

impl MuxProgressState {
    fn apply_line(&mut self, line: &str) -> bool {
        let Some((key, value)) = line.split_once('=') else {
            return false;
        };
        match key {
            "out_time_ms" => {
                if let Ok(us) = value.trim().parse::<f64>() {
                    self.out_time_secs = Some(us / 1_000_000.0);
                }
            }
            "speed" => self.speed = Some(value.trim().trim_end_matches('x').to_string()),
            "total_size" => self.total_size = Some(value.trim().to_string()),
            "progress" => return value.trim() == "end",
            _ => {}
        }
        false
    }

    fn to_fetch_progress(&self, duration_hint: f64, started_at: Instant) -> FetchProgress {
        let fraction = self
            .out_time_secs
            .map(|t| (t / duration_hint).clamp(0.0, 1.0) as f32)
            .unwrap_or(0.0);
        FetchProgress {
            fraction,
            elapsed_secs: started_at.elapsed().as_secs_f64(),
            size: self.total_size.clone().unwrap_or_default(),
            speed: self
                .speed
                .clone()
                .map(|s| format!("{s}x"))
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl HlsFetcher for MuxingFetcher {
    async fn fetch(
        &self,
        playlist_url: &str,
        output_dir: &Path,
        base_name: &str,
        duration_hint: Option<f64>,
        on_progress: Option<ProgressCallback>,
    ) -> CoreResult<PathBuf> {
        let sanitized = sanitize_filename(base_name);
        let output_path = output_dir.join(format!("{sanitized}.mp4"));

        if let Ok(metadata) = tokio::fs::metadata(&output_path).await {
            if metadata.len() > 0 {
                if let Some(cb) = &on_progress {
                    cb(FetchProgress {
                        fraction: 1.0,
                        elapsed_secs: 0.0,
                        size: String::new(),
                        speed: String::new(),
                    });
                }
                return Ok(output_path);
            }
        }

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| CoreError::FetchFailed(format!("failed to create output dir: {e}")))?;

        let duration_hint = duration_hint.unwrap_or(NOMINAL_DURATION_SECS);

        let mut child = Command::new(&self.ffmpeg_path)
            .args(["-y", "-i", playlist_url])
            .args(["-c", "copy", "-movflags", "+faststart"])
            .args(["-progress", "pipe:1", "-nostats", "-loglevel", "error"])
            .arg(&output_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CoreError::FetchFailed(format!("failed to spawn ffmpeg: {e}")))?;

        let stdout = child.stdout.take();
        let started_at = Instant::now();

        let reader_handle = stdout.map(|stdout| {
            let on_progress = on_progress.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                let mut state = MuxProgressState::default();
                let mut last_emit = Instant::now() - PROGRESS_THROTTLE;
                while let Ok(Some(line)) = lines.next_line().await {
                    let finished = state.apply_line(&line);
                    if (finished || last_emit.elapsed() >= PROGRESS_THROTTLE) && on_progress.is_some()
                    {
                        last_emit = Instant::now();
                        if let Some(cb) = &on_progress {
                            cb(state.to_fetch_progress(duration_hint, started_at));
                        }
                    }
                }
            })
        });

        let status = child
            .wait()
            .await
            .map_err(|e| CoreError::FetchFailed(format!("ffmpeg wait failed: {e}")))?;

        if let Some(handle) = reader_handle {
            handle.abort();
        }

        let stderr_tail = if let Some(mut stderr) = child.stderr.take() {
            use tokio::io::AsyncReadExt;
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        } else {
            String::new()
        };

        if !status.success() {
            return Err(CoreError::FetchFailed(format!(
                "ffmpeg exited with {status}: {}",
                stderr_tail.trim()
            )));
        }

        match tokio::fs::metadata(&output_path).await {
            Ok(metadata) if metadata.len() > 0 => {
                if let Some(cb) = &on_progress {
                    cb(FetchProgress {
                        fraction: 1.0,
                        elapsed_secs: started_at.elapsed().as_secs_f64(),
                        size: String::new(),
                        speed: String::new(),
                    });
                }
                Ok(output_path)
            }
            _ => Err(CoreError::FetchFailed(
                "ffmpeg reported success but produced no output file".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_out_time_speed_and_size_across_lines() {
        let mut state = MuxProgressState::default();
        state.apply_line("out_time_ms=45000000");
        state.apply_line("speed=2.5x");
        state.apply_line("total_size=10485760");
        assert_eq!(state.out_time_secs, Some(45.0));
        assert_eq!(state.speed.as_deref(), Some("2.5"));
        assert_eq!(state.total_size.as_deref(), Some("10485760"));
    }

    #[test]
    fn progress_end_marker_signals_completion() {
        let mut state = MuxProgressState::default();
        assert!(!state.apply_line("progress=continue"));
        assert!(state.apply_line("progress=end"));
    }

    #[test]
    fn fraction_is_clamped_and_uses_duration_hint() {
        let mut state = MuxProgressState::default();
        state.apply_line("out_time_ms=120000000");
        let progress = state.to_fetch_progress(60.0, Instant::now());
        assert_eq!(progress.fraction, 1.0);
    }

    #[tokio::test]
    async fn fetch_is_idempotent_when_output_already_exists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let output_path = tmp.path().join("Existing Movie.mp4");
        tokio::fs::write(&output_path, b"already here").await.unwrap();

        let fetcher = MuxingFetcher::new(PathBuf::from("/usr/bin/ffmpeg"));
        let result = fetcher
            .fetch(
                "https://example.com/master.m3u8",
                tmp.path(),
                "Existing Movie",
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(result, output_path);
    }
}
