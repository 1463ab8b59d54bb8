use std::collections::VecDeque;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;
use serde::Deserialize;

use crate::error::SqlStreamError;

/// A sequential stream of decoded RGB frames.
pub trait FrameSource {
    /// Frame rate reported by the container, if any.
    fn native_fps(&self) -> Option<f64>;

    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Frames held in memory; used for synthetic clips.
pub struct SyntheticSource {
    frames: VecDeque<RgbImage>,
    fps: Option<f64>,
}

impl SyntheticSource {
    pub fn new(frames: Vec<RgbImage>, fps: Option<f64>) -> Self {
        Self {
            frames: frames.into(),
            fps,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn native_fps(&self) -> Option<f64> {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.frames.pop_front())
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: u32,
    height: u32,
    #[serde(default)]
    r_frame_rate: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: Option<f64>,
}

/// Executables used to probe and decode media.
#[derive(Debug, Clone)]
pub struct DecoderTools {
    pub ffprobe: PathBuf,
    pub ffmpeg: PathBuf,
}

impl Default for DecoderTools {
    fn default() -> Self {
        Self {
            ffprobe: PathBuf::from("ffprobe"),
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

/// Decodes a file path or direct media URL through an ffmpeg subprocess.
pub struct FfmpegSource {
    input: String,
    info: StreamInfo,
    receiver: Option<mpsc::Receiver<Vec<u8>>>,
    worker: Option<JoinHandle<Result<()>>>,
    child: Child,
    frames_decoded: u32,
}

impl FfmpegSource {
    /// Probes the first video stream and starts decoding it.
    ///
    /// Probe or spawn failures are reported as `SourceUnavailable`.
    pub fn open(input: &str) -> Result<Self> {
        Self::open_with(input, &DecoderTools::default())
    }

    pub fn open_with(input: &str, tools: &DecoderTools) -> Result<Self> {
        let info = probe_stream(&tools.ffprobe, input).map_err(|error| {
            SqlStreamError::SourceUnavailable {
                source_label: input.to_owned(),
                reason: format!("{error:#}"),
            }
        })?;
        Self::spawn(&tools.ffmpeg, input, info).map_err(|error| {
            anyhow::Error::new(SqlStreamError::SourceUnavailable {
                source_label: input.to_owned(),
                reason: format!("{error:#}"),
            })
        })
    }

    pub fn info(&self) -> StreamInfo {
        self.info
    }

    fn spawn(ffmpeg: &Path, input: &str, info: StreamInfo) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);

        let mut child = Command::new(ffmpeg)
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-map")
            .arg("0:v:0")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .context("failed to spawn ffmpeg decoder")?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdout"))?;
        let frame_size = info.width as usize * info.height as usize * 3;

        let worker = thread::Builder::new()
            .name("sqlstream-ffmpeg-decoder".to_owned())
            .spawn(move || {
                loop {
                    let mut buffer = vec![0u8; frame_size];
                    match stdout.read_exact(&mut buffer) {
                        Ok(_) => {
                            if sender.send(buffer).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                        Err(e) => return Err(anyhow!("failed to read from ffmpeg: {e}")),
                    }
                }
                Ok(())
            })
            .context("failed to spawn ffmpeg reader thread")?;

        Ok(Self {
            input: input.to_owned(),
            info,
            receiver: Some(receiver),
            worker: Some(worker),
            child,
            frames_decoded: 0,
        })
    }

    /// Called once the pipe is drained. A reader error or a non-zero ffmpeg
    /// exit fails the stream; with no frames decoded the source counts as
    /// unavailable.
    fn end_of_stream(&mut self) -> Result<()> {
        let read_result = match self.worker.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(anyhow!("ffmpeg reader thread panicked"))),
            None => Ok(()),
        };
        let status = self.child.wait().context("failed to wait for ffmpeg")?;

        let reason = match read_result {
            Err(error) => format!("{error:#}"),
            Ok(()) if !status.success() => format!("ffmpeg exited with {status}"),
            Ok(()) => return Ok(()),
        };
        if self.frames_decoded == 0 {
            return Err(SqlStreamError::SourceUnavailable {
                source_label: self.input.clone(),
                reason,
            }
            .into());
        }
        bail!(
            "decoding failed after {} frame(s): {reason}",
            self.frames_decoded
        )
    }

    pub fn finish(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        drop(self.receiver.take());
        let _ = self.child.kill();
        let _ = self.child.wait();

        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(result) => result,
                Err(_) => Err(anyhow!("ffmpeg reader thread panicked")),
            }
        } else {
            Ok(())
        }
    }
}

impl FrameSource for FfmpegSource {
    fn native_fps(&self) -> Option<f64> {
        self.info.fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(receiver) = &self.receiver else {
            return Ok(None);
        };
        let Ok(buffer) = receiver.recv() else {
            self.receiver = None;
            self.end_of_stream()?;
            return Ok(None);
        };
        let (width, height) = (self.info.width, self.info.height);
        let frame = RgbImage::from_raw(width, height, buffer)
            .ok_or_else(|| anyhow!("decoded frame does not match {width}x{height}"))?;
        self.frames_decoded += 1;
        Ok(Some(frame))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn probe_stream(ffprobe: &Path, input: &str) -> Result<StreamInfo> {
    let output = Command::new(ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height,r_frame_rate")
        .arg("-of")
        .arg("json")
        .arg(input)
        .stdin(Stdio::null())
        .output()
        .context("failed to run ffprobe")?;
    if !output.status.success() {
        bail!(
            "ffprobe exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    parse_probe_output(&output.stdout)
}

fn parse_probe_output(raw: &[u8]) -> Result<StreamInfo> {
    let parsed: ProbeOutput =
        serde_json::from_slice(raw).context("ffprobe returned malformed json")?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no video stream found"))?;
    if stream.width == 0 || stream.height == 0 {
        bail!("video stream reports empty size {}x{}", stream.width, stream.height);
    }
    Ok(StreamInfo {
        width: stream.width,
        height: stream.height,
        fps: stream.r_frame_rate.as_deref().and_then(parse_frame_rate),
    })
}

/// Parses ffprobe rates such as `30000/1001` or `25`. Zero rates yield `None`.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let value = match raw.trim().split_once('/') {
        Some((num, den)) => {
            let num = num.trim().parse::<f64>().ok()?;
            let den = den.trim().parse::<f64>().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse::<f64>().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}
