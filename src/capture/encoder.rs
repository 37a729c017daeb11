//! Media encoder backed by an ffmpeg child process
//!
//! Canvas frames are piped to ffmpeg's stdin as raw RGBA, microphone samples
//! go over a loopback TCP socket as f32le, and the muxed container comes back
//! on stdout in chunks. Every pipe is serviced by its own thread so the
//! render loop never blocks on ffmpeg.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use image::RgbaImage;

use super::format::{Container, FfmpegCapabilities, FormatSupport, RecordingFormat};
use crate::error::AppError;

/// Frames queued for ffmpeg before writes are refused
const VIDEO_QUEUE: usize = 8;

const STDOUT_CHUNK: usize = 64 * 1024;

/// Microphone stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub format: RecordingFormat,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub audio: Option<AudioFormat>,
}

/// Encodes canvas frames and audio into container segments
pub trait MediaEncoder: FormatSupport {
    /// Whether the encoding facility exists at all
    fn is_available(&self) -> bool {
        true
    }
    fn start(&mut self, settings: &EncoderSettings) -> Result<(), AppError>;
    /// Queue one frame. `Ok(false)` means the frame was refused because the
    /// encoder is backed up; the caller owes it and offers it again later.
    fn write_video(&mut self, frame: &RgbaImage) -> Result<bool, AppError>;
    fn write_audio(&mut self, samples: &[f32]) -> Result<(), AppError>;
    /// Segments produced since the last call
    fn take_segments(&mut self) -> Vec<Vec<u8>>;
    /// Flush and close, returning the remaining segments
    fn finish(&mut self) -> Result<Vec<Vec<u8>>, AppError>;
}

/// Locate ffmpeg on PATH
pub fn find_ffmpeg() -> Option<PathBuf> {
    which::which("ffmpeg").ok()
}

pub struct FfmpegEncoder {
    ffmpeg: Option<PathBuf>,
    capabilities: FfmpegCapabilities,
    running: Option<RunningEncoder>,
}

struct RunningEncoder {
    child: Child,
    video_tx: Option<Sender<Vec<u8>>>,
    audio_tx: Option<Sender<Vec<u8>>>,
    segments: Receiver<Vec<u8>>,
    threads: Vec<JoinHandle<()>>,
    refused_frames: u64,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg: Option<PathBuf>) -> Self {
        let capabilities = match &ffmpeg {
            Some(path) => {
                tracing::info!("Using ffmpeg at {}", path.display());
                FfmpegCapabilities::probe(path)
            }
            None => {
                tracing::warn!("ffmpeg not found on PATH, recording disabled");
                FfmpegCapabilities::default()
            }
        };
        Self {
            ffmpeg,
            capabilities,
            running: None,
        }
    }

    /// Encoder using whichever ffmpeg is on PATH
    pub fn detect() -> Self {
        Self::new(find_ffmpeg())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

/// Build the ffmpeg argument list for a recording
pub fn ffmpeg_args(settings: &EncoderSettings, audio_addr: Option<SocketAddr>) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgba".into(),
        "-s".into(),
        format!("{}x{}", settings.width, settings.height),
        "-r".into(),
        settings.fps.to_string(),
        "-i".into(),
        "pipe:0".into(),
    ];

    let audio = match (settings.audio, audio_addr, settings.format.audio) {
        (Some(audio), Some(addr), Some(codec)) => Some((audio, addr, codec)),
        _ => None,
    };

    if let Some((audio, addr, _)) = audio {
        args.extend([
            "-f".into(),
            "f32le".into(),
            "-ar".into(),
            audio.sample_rate.to_string(),
            "-ac".into(),
            audio.channels.to_string(),
            "-i".into(),
            format!("tcp://{}", addr),
        ]);
    }

    args.extend([
        "-map".into(),
        "0:v".into(),
        "-c:v".into(),
        settings.format.video.encoder().into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-g".into(),
        settings.fps.to_string(),
    ]);

    match settings.format.container {
        Container::Webm => args.extend([
            "-deadline".into(),
            "realtime".into(),
            "-cpu-used".into(),
            "8".into(),
            "-b:v".into(),
            "2M".into(),
        ]),
        Container::Mp4 => args.extend([
            "-preset".into(),
            "veryfast".into(),
            "-crf".into(),
            "23".into(),
        ]),
    }

    if let Some((_, _, codec)) = audio {
        args.extend([
            "-map".into(),
            "1:a".into(),
            "-c:a".into(),
            codec.encoder().into(),
            "-b:a".into(),
            "128k".into(),
        ]);
    }

    args.extend(["-f".into(), settings.format.container.muxer().into()]);
    if settings.format.container == Container::Mp4 {
        // Non-seekable output needs a fragmented file
        args.extend([
            "-movflags".into(),
            "frag_keyframe+empty_moov+default_base_moof".into(),
        ]);
    }
    args.push("pipe:1".into());
    args
}

fn spawn_video_writer(mut stdin: ChildStdin, frames: Receiver<Vec<u8>>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for frame in frames {
            if let Err(e) = stdin.write_all(&frame) {
                tracing::warn!("ffmpeg video pipe closed: {}", e);
                break;
            }
        }
        // stdin drops here, signalling end of video to ffmpeg
    })
}

fn spawn_audio_writer(listener: TcpListener, samples: Receiver<Vec<u8>>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut pending: Vec<Vec<u8>> = Vec::new();
        if let Err(e) = listener.set_nonblocking(true) {
            tracing::warn!("Audio socket setup failed: {}", e);
            return;
        }

        let mut stream = loop {
            match listener.accept() {
                Ok((stream, _)) => break stream,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    tracing::warn!("ffmpeg never connected for audio: {}", e);
                    return;
                }
            }
            loop {
                match samples.try_recv() {
                    Ok(chunk) => pending.push(chunk),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }
            std::thread::sleep(Duration::from_millis(5));
        };

        if let Err(e) = stream.set_nonblocking(false) {
            tracing::warn!("Audio socket setup failed: {}", e);
            return;
        }

        for chunk in pending.into_iter().chain(samples) {
            if let Err(e) = stream.write_all(&chunk) {
                tracing::warn!("ffmpeg audio socket closed: {}", e);
                break;
            }
        }
    })
}

fn spawn_output_reader(mut stdout: impl Read + Send + 'static, segments: Sender<Vec<u8>>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = vec![0u8; STDOUT_CHUNK];
        loop {
            match stdout.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if segments.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!("Reading ffmpeg output failed: {}", e);
                    break;
                }
            }
        }
    })
}

fn spawn_stderr_logger(stderr: impl Read + Send + 'static) -> JoinHandle<()> {
    std::thread::spawn(move || {
        use std::io::BufRead;
        for line in std::io::BufReader::new(stderr).lines().map_while(Result::ok) {
            tracing::warn!("ffmpeg: {}", line);
        }
    })
}

impl FormatSupport for FfmpegEncoder {
    fn is_type_supported(&self, mime: &str) -> bool {
        self.ffmpeg.is_some() && self.capabilities.is_type_supported(mime)
    }
}

impl MediaEncoder for FfmpegEncoder {
    fn is_available(&self) -> bool {
        self.ffmpeg.is_some()
    }

    fn start(&mut self, settings: &EncoderSettings) -> Result<(), AppError> {
        if self.running.is_some() {
            return Err(AppError::AlreadyRecording);
        }
        let ffmpeg = self
            .ffmpeg
            .clone()
            .ok_or_else(|| AppError::RecordingUnsupported("ffmpeg not found".to_string()))?;

        let listener = match (settings.audio, settings.format.audio) {
            (Some(_), Some(_)) => Some(
                TcpListener::bind(("127.0.0.1", 0))
                    .map_err(|e| AppError::RecordingSave(format!("audio socket: {}", e)))?,
            ),
            _ => None,
        };
        let audio_addr = match &listener {
            Some(l) => Some(
                l.local_addr()
                    .map_err(|e| AppError::RecordingSave(format!("audio socket: {}", e)))?,
            ),
            None => None,
        };

        let args = ffmpeg_args(settings, audio_addr);
        tracing::info!("Starting encoder: {} {}", ffmpeg.display(), args.join(" "));

        let mut child = Command::new(&ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AppError::RecordingSave(format!("failed to start ffmpeg: {}", e)))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AppError::RecordingSave("ffmpeg pipes unavailable".to_string()));
        };

        let mut threads = Vec::new();

        let (video_tx, video_rx) = crossbeam_channel::bounded(VIDEO_QUEUE);
        threads.push(spawn_video_writer(stdin, video_rx));

        let audio_tx = listener.map(|listener| {
            let (tx, rx) = crossbeam_channel::unbounded();
            threads.push(spawn_audio_writer(listener, rx));
            tx
        });

        let (segment_tx, segments) = crossbeam_channel::unbounded();
        threads.push(spawn_output_reader(stdout, segment_tx));

        if let Some(stderr) = child.stderr.take() {
            threads.push(spawn_stderr_logger(stderr));
        }

        self.running = Some(RunningEncoder {
            child,
            video_tx: Some(video_tx),
            audio_tx,
            segments,
            threads,
            refused_frames: 0,
        });
        Ok(())
    }

    fn write_video(&mut self, frame: &RgbaImage) -> Result<bool, AppError> {
        let running = self.running.as_mut().ok_or(AppError::NotRecording)?;
        let Some(tx) = running.video_tx.as_ref() else {
            return Err(AppError::NotRecording);
        };

        match tx.try_send(frame.as_raw().clone()) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                running.refused_frames += 1;
                if running.refused_frames % 30 == 1 {
                    tracing::warn!("Encoder falling behind, {} frames deferred", running.refused_frames);
                }
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(AppError::RecordingSave("ffmpeg stopped accepting video".to_string()))
            }
        }
    }

    fn write_audio(&mut self, samples: &[f32]) -> Result<(), AppError> {
        let running = self.running.as_mut().ok_or(AppError::NotRecording)?;
        let Some(tx) = running.audio_tx.as_ref() else {
            return Ok(());
        };
        if samples.is_empty() {
            return Ok(());
        }

        let bytes: &[u8] = bytemuck::cast_slice(samples);
        if tx.send(bytes.to_vec()).is_err() {
            // The audio track ending does not stop the video
            tracing::warn!("ffmpeg audio input closed");
            running.audio_tx = None;
        }
        Ok(())
    }

    fn take_segments(&mut self) -> Vec<Vec<u8>> {
        match &self.running {
            Some(running) => running.segments.try_iter().collect(),
            None => Vec::new(),
        }
    }

    fn finish(&mut self) -> Result<Vec<Vec<u8>>, AppError> {
        let mut running = self.running.take().ok_or(AppError::NotRecording)?;

        // Closing the senders ends the writer threads, which closes ffmpeg's inputs
        running.video_tx = None;
        running.audio_tx = None;

        let status = running
            .child
            .wait()
            .map_err(|e| AppError::RecordingSave(format!("waiting for ffmpeg: {}", e)))?;

        for handle in running.threads.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("Encoder pipe thread panicked");
            }
        }

        let segments: Vec<Vec<u8>> = running.segments.try_iter().collect();
        if running.refused_frames > 0 {
            tracing::info!("Encoder deferred {} frames while backed up", running.refused_frames);
        }

        if !status.success() {
            tracing::warn!("ffmpeg exited with {}", status);
        }
        Ok(segments)
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if let Some(mut running) = self.running.take() {
            running.video_tx = None;
            running.audio_tx = None;
            let _ = running.child.kill();
            let _ = running.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(mime: &str, audio: Option<AudioFormat>) -> EncoderSettings {
        EncoderSettings {
            format: RecordingFormat::parse(mime).unwrap(),
            width: 640,
            height: 480,
            fps: 30,
            audio,
        }
    }

    fn window(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone())
    }

    #[test]
    fn test_webm_args_with_audio() {
        let addr: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        let audio = AudioFormat {
            sample_rate: 48_000,
            channels: 2,
        };
        let args = ffmpeg_args(&settings("video/webm;codecs=vp9,opus", Some(audio)), Some(addr));

        assert_eq!(window(&args, "-s").as_deref(), Some("640x480"));
        assert_eq!(window(&args, "-c:v").as_deref(), Some("libvpx-vp9"));
        assert_eq!(window(&args, "-c:a").as_deref(), Some("libopus"));
        assert_eq!(window(&args, "-ar").as_deref(), Some("48000"));
        assert!(args.contains(&"tcp://127.0.0.1:5555".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_video_only_mp4_is_fragmented() {
        let args = ffmpeg_args(&settings("video/mp4;codecs=avc1,mp4a", None), None);

        assert_eq!(window(&args, "-c:v").as_deref(), Some("libx264"));
        assert!(window(&args, "-c:a").is_none());
        assert!(!args.iter().any(|a| a.starts_with("tcp://")));
        assert_eq!(
            window(&args, "-movflags").as_deref(),
            Some("frag_keyframe+empty_moov+default_base_moof")
        );
    }

    #[test]
    fn test_missing_ffmpeg_supports_nothing() {
        let mut encoder = FfmpegEncoder::new(None);
        assert!(!encoder.is_available());
        assert!(!encoder.is_type_supported("video/webm;codecs=vp8,opus"));
        assert!(matches!(
            encoder.start(&settings("video/webm", None)),
            Err(AppError::RecordingUnsupported(_))
        ));
        assert_eq!(encoder.finish(), Err(AppError::NotRecording));
    }
}
