use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{EncodingWorker, TranscodeData, TranscodedSegment, WorkerError, WorkerFactory};
use crate::device::{Device, DeviceTarget, HardwareEncoderType};
use crate::profiles::VideoProfile;

const STDERR_TAIL: usize = 2048;

/// Spawns [`FfmpegWorker`]s that encode on the device they were created for.
#[derive(Debug, Clone)]
pub struct FfmpegWorkerFactory {
    ffmpeg_path: String,
    ffprobe_path: String,
    work_dir: PathBuf,
}

impl FfmpegWorkerFactory {
    pub fn new(ffmpeg_path: String, ffprobe_path: String, work_dir: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
            work_dir,
        }
    }
}

impl WorkerFactory for FfmpegWorkerFactory {
    fn spawn(&self, device: &Device, job: &str) -> Result<Box<dyn EncodingWorker>, WorkerError> {
        let scratch = self.work_dir.join(format!(
            "{}-{}-{}",
            sanitize(job),
            device.id.index(),
            Uuid::new_v4().simple()
        ));
        Ok(Box::new(FfmpegWorker {
            ffmpeg_path: self.ffmpeg_path.clone(),
            ffprobe_path: self.ffprobe_path.clone(),
            target: device.target.clone(),
            scratch,
            sequence: 0,
        }))
    }
}

/// Runs one ffmpeg process per transcode, writing renditions into a private
/// scratch directory and reading them back into memory.
#[derive(Debug)]
pub struct FfmpegWorker {
    ffmpeg_path: String,
    ffprobe_path: String,
    target: DeviceTarget,
    scratch: PathBuf,
    sequence: u64,
}

impl FfmpegWorker {
    pub fn target(&self) -> &DeviceTarget {
        &self.target
    }

    async fn run(&self, program: &str, command: &mut Command) -> Result<Output, WorkerError> {
        let output = command
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| WorkerError::Launch {
                program: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut start = stderr.len().saturating_sub(STDERR_TAIL);
            while !stderr.is_char_boundary(start) {
                start += 1;
            }
            return Err(WorkerError::Process {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: stderr[start..].trim().to_string(),
            });
        }

        Ok(output)
    }

    /// Frame count times frame size of the first video stream.
    async fn probe_pixels(&self, media: &str) -> Result<u64, WorkerError> {
        let mut command = Command::new(&self.ffprobe_path);
        command.args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-count_packets",
            "-show_entries",
            "stream=width,height,nb_read_packets",
            "-of",
            "csv=p=0",
            media,
        ]);
        let output = self.run(&self.ffprobe_path, &mut command).await?;
        parse_probe_pixels(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl EncodingWorker for FfmpegWorker {
    async fn transcode(
        &mut self,
        input: &str,
        profiles: &[VideoProfile],
    ) -> Result<TranscodeData, WorkerError> {
        fs::create_dir_all(&self.scratch)
            .await
            .map_err(|source| WorkerError::Io {
                path: self.scratch.clone(),
                source,
            })?;

        self.sequence += 1;
        let mut command = Command::new(&self.ffmpeg_path);
        command.args(["-hide_banner", "-nostdin", "-y", "-loglevel", "error"]);
        command.args(input_args(&self.target));
        command.arg("-i").arg(input);

        let mut outputs = Vec::with_capacity(profiles.len());
        for (index, profile) in profiles.iter().enumerate() {
            let (width, height) = profile.resolution()?;
            let path = self
                .scratch
                .join(format!("out_{}_{}.ts", self.sequence, index));
            command.args(output_args(&self.target, profile, width, height));
            command.arg(&path);
            outputs.push(path);
        }

        debug!(
            target: "encpool::worker",
            device = %self.target,
            input,
            outputs = outputs.len(),
            "running ffmpeg"
        );
        self.run(&self.ffmpeg_path, &mut command).await?;

        let mut segments = Vec::with_capacity(outputs.len());
        for path in &outputs {
            let pixels = self.probe_pixels(&path.to_string_lossy()).await?;
            let data = fs::read(path).await.map_err(|source| WorkerError::Io {
                path: path.clone(),
                source,
            })?;
            if let Err(err) = fs::remove_file(path).await {
                debug!(
                    target: "encpool::worker",
                    path = %path.display(),
                    error = %err,
                    "failed to remove rendition"
                );
            }
            segments.push(TranscodedSegment { data, pixels });
        }

        if segments.len() != profiles.len() {
            return Err(WorkerError::OutputMismatch {
                expected: profiles.len(),
                actual: segments.len(),
            });
        }

        let decoded_pixels = self.probe_pixels(input).await?;
        Ok(TranscodeData {
            segments,
            decoded_pixels,
        })
    }

    async fn stop(&mut self) {
        match fs::remove_dir_all(&self.scratch).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                target: "encpool::worker",
                path = %self.scratch.display(),
                error = %err,
                "failed to remove worker scratch directory"
            ),
        }
    }
}

/// Decoder flags placed before `-i`.
pub fn input_args(target: &DeviceTarget) -> Vec<String> {
    let DeviceTarget::Accelerator { kind, ordinal } = target else {
        return Vec::new();
    };

    let mut args = vec!["-hwaccel".to_string(), kind.ffmpeg_hwaccel().to_string()];
    if kind.addressable() {
        args.extend(["-hwaccel_device".to_string(), ordinal.clone()]);
    }
    if let Some(format) = hw_output_format(*kind) {
        args.extend(["-hwaccel_output_format".to_string(), format.to_string()]);
    }
    args
}

/// Encoder flags for one rendition, placed before its output path.
pub fn output_args(
    target: &DeviceTarget,
    profile: &VideoProfile,
    width: u32,
    height: u32,
) -> Vec<String> {
    let mut args = Vec::new();
    match target {
        DeviceTarget::Software => {
            args.extend(["-s".to_string(), format!("{width}x{height}")]);
            args.extend(["-c:v".to_string(), "libx264".to_string()]);
            args.extend(["-preset".to_string(), "veryfast".to_string()]);
        }
        DeviceTarget::Accelerator { kind, .. } => {
            match scale_filter(*kind, width, height) {
                Some(filter) => args.extend(["-vf".to_string(), filter]),
                None => args.extend(["-s".to_string(), format!("{width}x{height}")]),
            }
            args.extend(["-c:v".to_string(), kind.h264_encoder().to_string()]);
        }
    }
    args.extend(["-r".to_string(), profile.framerate.to_string()]);
    args.extend(["-b:v".to_string(), profile.bitrate.clone()]);
    args.extend(["-c:a".to_string(), "copy".to_string()]);
    args.extend(["-f".to_string(), "mpegts".to_string()]);
    args
}

fn hw_output_format(kind: HardwareEncoderType) -> Option<&'static str> {
    match kind {
        HardwareEncoderType::Nvenc => Some("cuda"),
        HardwareEncoderType::Vaapi => Some("vaapi"),
        HardwareEncoderType::Qsv => Some("qsv"),
        HardwareEncoderType::VideoToolbox | HardwareEncoderType::Amf => None,
    }
}

fn scale_filter(kind: HardwareEncoderType, width: u32, height: u32) -> Option<String> {
    match kind {
        HardwareEncoderType::Nvenc => Some(format!("scale_cuda={width}:{height}")),
        HardwareEncoderType::Vaapi => Some(format!("scale_vaapi=w={width}:h={height}")),
        HardwareEncoderType::Qsv => Some(format!("scale_qsv=w={width}:h={height}")),
        HardwareEncoderType::VideoToolbox | HardwareEncoderType::Amf => None,
    }
}

fn parse_probe_pixels(stdout: &str) -> Result<u64, WorkerError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    match fields.as_slice() {
        [width, height, frames, ..] => {
            let parse = |v: &str| {
                v.parse::<u64>()
                    .map_err(|_| WorkerError::Probe(line.to_string()))
            };
            Ok(parse(width)?
                .saturating_mul(parse(height)?)
                .saturating_mul(parse(frames)?))
        }
        _ => Err(WorkerError::Probe(line.to_string())),
    }
}

fn sanitize(job: &str) -> String {
    job.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect()
}
