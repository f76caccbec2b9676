use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("invalid resolution '{0}', expected WIDTHxHEIGHT")]
    InvalidResolution(String),

    #[error("unknown video profile '{0}'")]
    UnknownPreset(String),
}

/// A single requested output rendition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoProfile {
    pub name: String,
    /// Output dimensions as `WIDTHxHEIGHT`.
    pub resolution: String,
    pub framerate: u32,
    pub bitrate: String,
    pub aspect_ratio: String,
}

/// Standard renditions: (name, resolution, framerate, bitrate, aspect ratio).
const PRESETS: &[(&str, &str, u32, &str, &str)] = &[
    ("P720p60fps16x9", "1280x720", 60, "6000k", "16:9"),
    ("P720p30fps16x9", "1280x720", 30, "4000k", "16:9"),
    ("P720p25fps16x9", "1280x720", 25, "3500k", "16:9"),
    ("P720p30fps4x3", "960x720", 30, "3500k", "4:3"),
    ("P576p30fps16x9", "1024x576", 30, "1500k", "16:9"),
    ("P576p25fps16x9", "1024x576", 25, "1500k", "16:9"),
    ("P360p30fps16x9", "640x360", 30, "1200k", "16:9"),
    ("P360p25fps16x9", "640x360", 25, "1000k", "16:9"),
    ("P360p30fps4x3", "480x360", 30, "1000k", "4:3"),
    ("P240p30fps16x9", "426x240", 30, "600k", "16:9"),
    ("P240p25fps16x9", "426x240", 25, "600k", "16:9"),
    ("P240p30fps4x3", "320x240", 30, "600k", "4:3"),
    ("P144p30fps16x9", "256x144", 30, "400k", "16:9"),
    ("P144p25fps16x9", "256x144", 25, "400k", "16:9"),
];

impl VideoProfile {
    pub fn new(
        name: impl Into<String>,
        resolution: impl Into<String>,
        framerate: u32,
        bitrate: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            resolution: resolution.into(),
            framerate,
            bitrate: bitrate.into(),
            aspect_ratio: "16:9".to_string(),
        }
    }

    /// Look up one of the standard renditions by name, e.g. `P720p30fps16x9`.
    pub fn preset(name: &str) -> Result<Self, ProfileError> {
        PRESETS
            .iter()
            .find(|(preset, ..)| preset.eq_ignore_ascii_case(name))
            .map(|(preset, res, fps, bitrate, aspect)| Self {
                name: (*preset).to_string(),
                resolution: (*res).to_string(),
                framerate: *fps,
                bitrate: (*bitrate).to_string(),
                aspect_ratio: (*aspect).to_string(),
            })
            .ok_or_else(|| ProfileError::UnknownPreset(name.to_string()))
    }

    /// Parse a comma separated list of preset names.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, ProfileError> {
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(Self::preset)
            .collect()
    }

    pub fn preset_names() -> impl Iterator<Item = &'static str> {
        PRESETS.iter().map(|(name, ..)| *name)
    }

    /// Width and height of this rendition.
    pub fn resolution(&self) -> Result<(u32, u32), ProfileError> {
        parse_resolution(&self.resolution)
            .ok_or_else(|| ProfileError::InvalidResolution(self.resolution.clone()))
    }
}

fn parse_resolution(resolution: &str) -> Option<(u32, u32)> {
    let (width, height) = resolution.split_once('x')?;
    match (width.trim().parse::<u32>(), height.trim().parse::<u32>()) {
        (Ok(width), Ok(height)) if width > 0 && height > 0 => Some((width, height)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_resolve_case_insensitively() {
        let profile = VideoProfile::preset("p720p30fps16x9").unwrap();
        assert_eq!(profile.name, "P720p30fps16x9");
        assert_eq!(profile.resolution().unwrap(), (1280, 720));
        assert_eq!(profile.framerate, 30);
    }

    #[test]
    fn parse_list_skips_blank_entries() {
        let profiles = VideoProfile::parse_list("P240p30fps16x9, ,P144p25fps16x9").unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[1].framerate, 25);
    }

    #[test]
    fn unknown_preset_is_an_error() {
        assert_eq!(
            VideoProfile::parse_list("P720p30fps16x9,P9000p").unwrap_err(),
            ProfileError::UnknownPreset("P9000p".to_string())
        );
    }

    #[test]
    fn malformed_resolutions_are_rejected() {
        for bad in ["", "1280", "1280x", "x720", "0x720", "widexhigh"] {
            let profile = VideoProfile::new("bad", bad, 30, "1000k");
            assert!(profile.resolution().is_err(), "accepted {bad:?}");
        }
    }
}
