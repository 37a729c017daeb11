//! Recording format selection
//!
//! Formats are named by mime type (`video/webm;codecs=vp9,opus`). The first
//! preference the encoder supports wins.

use std::collections::HashSet;
use std::path::Path;
use std::process::{Command, Stdio};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Webm,
    Mp4,
}

impl Container {
    /// ffmpeg muxer name
    pub fn muxer(self) -> &'static str {
        match self {
            Container::Webm => "webm",
            Container::Mp4 => "mp4",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Container::Webm => "webm",
            Container::Mp4 => "mp4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Vp9,
    Vp8,
    H264,
}

impl VideoCodec {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "vp9" | "vp09" => Some(VideoCodec::Vp9),
            "vp8" => Some(VideoCodec::Vp8),
            "h264" | "avc1" => Some(VideoCodec::H264),
            _ => {
                // avc1.42E01E and friends carry a profile suffix
                if name.starts_with("avc1.") {
                    Some(VideoCodec::H264)
                } else {
                    None
                }
            }
        }
    }

    /// ffmpeg encoder used for this codec
    pub fn encoder(self) -> &'static str {
        match self {
            VideoCodec::Vp9 => "libvpx-vp9",
            VideoCodec::Vp8 => "libvpx",
            VideoCodec::H264 => "libx264",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
    Aac,
}

impl AudioCodec {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "opus" => Some(AudioCodec::Opus),
            "aac" | "mp4a" => Some(AudioCodec::Aac),
            _ if name.starts_with("mp4a.") => Some(AudioCodec::Aac),
            _ => None,
        }
    }

    pub fn encoder(self) -> &'static str {
        match self {
            AudioCodec::Opus => "libopus",
            AudioCodec::Aac => "aac",
        }
    }
}

/// A parsed recording mime type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingFormat {
    pub mime: String,
    pub container: Container,
    pub video: VideoCodec,
    pub audio: Option<AudioCodec>,
}

impl RecordingFormat {
    /// Parse `video/<container>[;codecs=<video>[,<audio>]]`.
    ///
    /// Without a codec list the container's usual pair is assumed.
    pub fn parse(mime: &str) -> Option<Self> {
        let mut parts = mime.split(';');
        let container = match parts.next()?.trim().to_ascii_lowercase().as_str() {
            "video/webm" => Container::Webm,
            "video/mp4" => Container::Mp4,
            _ => return None,
        };

        let mut codecs: Option<Vec<String>> = None;
        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            if key.trim().eq_ignore_ascii_case("codecs") {
                let value = value.trim().trim_matches('"');
                codecs = Some(
                    value
                        .split(',')
                        .map(|c| c.trim().to_ascii_lowercase())
                        .filter(|c| !c.is_empty())
                        .collect(),
                );
            }
        }

        let (video, audio) = match codecs {
            None => match container {
                Container::Webm => (VideoCodec::Vp8, Some(AudioCodec::Opus)),
                Container::Mp4 => (VideoCodec::H264, Some(AudioCodec::Aac)),
            },
            Some(list) => {
                let mut video = None;
                let mut audio = None;
                for codec in &list {
                    if let Some(v) = VideoCodec::from_name(codec) {
                        video.get_or_insert(v);
                    } else if let Some(a) = AudioCodec::from_name(codec) {
                        audio.get_or_insert(a);
                    } else {
                        return None;
                    }
                }
                (video?, audio)
            }
        };

        let compatible = match container {
            Container::Webm => {
                matches!(video, VideoCodec::Vp8 | VideoCodec::Vp9)
                    && matches!(audio, None | Some(AudioCodec::Opus))
            }
            Container::Mp4 => true,
        };
        if !compatible {
            return None;
        }

        Some(Self {
            mime: mime.to_string(),
            container,
            video,
            audio,
        })
    }

    pub fn extension(&self) -> &'static str {
        self.container.extension()
    }
}

/// Answers whether a recording mime type can be produced
pub trait FormatSupport {
    fn is_type_supported(&self, mime: &str) -> bool;
}

/// First preference the encoder supports, in preference order
pub fn select_format<S: FormatSupport + ?Sized>(
    preferences: &[String],
    support: &S,
) -> Option<RecordingFormat> {
    preferences.iter().find_map(|mime| {
        if !support.is_type_supported(mime) {
            tracing::debug!("Recording format {} not supported", mime);
            return None;
        }
        RecordingFormat::parse(mime)
    })
}

/// Encoders available in the local ffmpeg build
#[derive(Debug, Clone, Default)]
pub struct FfmpegCapabilities {
    encoders: HashSet<String>,
}

impl FfmpegCapabilities {
    /// Query `ffmpeg -encoders`. An ffmpeg that cannot be run supports nothing.
    pub fn probe(ffmpeg: &Path) -> Self {
        let output = Command::new(ffmpeg)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();

        match output {
            Ok(output) if output.status.success() => {
                let caps = Self::from_encoder_list(&String::from_utf8_lossy(&output.stdout));
                tracing::info!("ffmpeg reports {} encoders", caps.encoders.len());
                caps
            }
            Ok(output) => {
                tracing::warn!("ffmpeg -encoders exited with {}", output.status);
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to run {}: {}", ffmpeg.display(), e);
                Self::default()
            }
        }
    }

    /// Parse the table printed by `ffmpeg -encoders`
    pub fn from_encoder_list(listing: &str) -> Self {
        let encoders = listing
            .lines()
            .skip_while(|line| !line.trim_start().starts_with("---"))
            .skip(1)
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let flags = fields.next()?;
                let name = fields.next()?;
                (flags.len() == 6).then(|| name.to_string())
            })
            .collect();
        Self { encoders }
    }

    pub fn has_encoder(&self, name: &str) -> bool {
        self.encoders.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.encoders.is_empty()
    }
}

impl FormatSupport for FfmpegCapabilities {
    fn is_type_supported(&self, mime: &str) -> bool {
        let Some(format) = RecordingFormat::parse(mime) else {
            return false;
        };
        self.has_encoder(format.video.encoder())
            && format.audio.map_or(true, |a| self.has_encoder(a.encoder()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Supports(Vec<&'static str>);

    impl FormatSupport for Supports {
        fn is_type_supported(&self, mime: &str) -> bool {
            self.0.contains(&mime)
        }
    }

    const VP9: &str = "video/webm;codecs=vp9,opus";
    const VP8: &str = "video/webm;codecs=vp8,opus";
    const MP4: &str = "video/mp4;codecs=avc1,mp4a";

    fn prefs() -> Vec<String> {
        vec![VP9.to_string(), VP8.to_string(), MP4.to_string()]
    }

    #[test]
    fn test_selects_first_supported_preference() {
        let selected = select_format(&prefs(), &Supports(vec![VP8, MP4])).unwrap();
        assert_eq!(selected.mime, VP8);
        assert_eq!(selected.video, VideoCodec::Vp8);

        assert!(select_format(&prefs(), &Supports(vec![])).is_none());
    }

    #[test]
    fn test_parse_mime_types() {
        let mp4 = RecordingFormat::parse(MP4).unwrap();
        assert_eq!(mp4.container, Container::Mp4);
        assert_eq!(mp4.video, VideoCodec::H264);
        assert_eq!(mp4.audio, Some(AudioCodec::Aac));
        assert_eq!(mp4.extension(), "mp4");

        let bare = RecordingFormat::parse("video/webm").unwrap();
        assert_eq!(bare.video, VideoCodec::Vp8);

        let video_only = RecordingFormat::parse("video/webm;codecs=vp9").unwrap();
        assert_eq!(video_only.audio, None);

        assert!(RecordingFormat::parse("video/webm;codecs=h264").is_none());
        assert!(RecordingFormat::parse("video/ogg").is_none());
        assert!(RecordingFormat::parse("video/webm;codecs=theora").is_none());
    }

    #[test]
    fn test_ffmpeg_encoder_list() {
        let listing = "Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)
 V....D libvpx               libvpx VP8 (codec vp8)
 A....D aac                  AAC (Advanced Audio Coding)
 A....D libopus              libopus Opus (codec opus)
";
        let caps = FfmpegCapabilities::from_encoder_list(listing);
        assert!(caps.has_encoder("libvpx"));
        assert!(!caps.has_encoder("="));

        assert!(!caps.is_type_supported(VP9));
        assert!(caps.is_type_supported(VP8));
        assert!(caps.is_type_supported(MP4));
        assert_eq!(select_format(&prefs(), &caps).unwrap().mime, VP8);
    }
}
