use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Position of a device within the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub usize);

impl DeviceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceParseError {
    #[error("empty device target")]
    Empty,

    #[error("unknown accelerator kind '{0}'")]
    UnknownKind(String),

    #[error("device target '{0}' is missing an ordinal")]
    MissingOrdinal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareEncoderType {
    Nvenc,
    Vaapi,
    Qsv,
    VideoToolbox,
    Amf,
}

impl HardwareEncoderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nvenc => "nvenc",
            Self::Vaapi => "vaapi",
            Self::Qsv => "qsv",
            Self::VideoToolbox => "videotoolbox",
            Self::Amf => "amf",
        }
    }

    pub fn ffmpeg_hwaccel(&self) -> &'static str {
        match self {
            Self::Nvenc => "cuda",
            Self::Vaapi => "vaapi",
            Self::Qsv => "qsv",
            Self::VideoToolbox => "videotoolbox",
            Self::Amf => "d3d11va",
        }
    }

    pub fn h264_encoder(&self) -> &'static str {
        match self {
            Self::Nvenc => "h264_nvenc",
            Self::Vaapi => "h264_vaapi",
            Self::Qsv => "h264_qsv",
            Self::VideoToolbox => "h264_videotoolbox",
            Self::Amf => "h264_amf",
        }
    }

    /// Whether ffmpeg accepts `-hwaccel_device` for this accelerator.
    pub fn addressable(&self) -> bool {
        !matches!(self, Self::VideoToolbox)
    }
}

impl FromStr for HardwareEncoderType {
    type Err = DeviceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nvenc" | "nvidia" | "cuda" => Ok(Self::Nvenc),
            "vaapi" => Ok(Self::Vaapi),
            "qsv" => Ok(Self::Qsv),
            "videotoolbox" | "vt" => Ok(Self::VideoToolbox),
            "amf" => Ok(Self::Amf),
            other => Err(DeviceParseError::UnknownKind(other.to_string())),
        }
    }
}

/// What a pool slot actually encodes on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceTarget {
    Software,
    Accelerator {
        kind: HardwareEncoderType,
        /// GPU index or render node, passed to ffmpeg as `-hwaccel_device`.
        ordinal: String,
    },
}

impl FromStr for DeviceTarget {
    type Err = DeviceParseError;

    /// Accepts `sw`/`software`, `<kind>:<ordinal>` (e.g. `vaapi:/dev/dri/renderD128`)
    /// or a bare ordinal, which names an NVENC GPU.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let target = s.trim();
        if target.is_empty() {
            return Err(DeviceParseError::Empty);
        }
        if target.eq_ignore_ascii_case("sw") || target.eq_ignore_ascii_case("software") {
            return Ok(Self::Software);
        }

        match target.split_once(':') {
            Some((kind, ordinal)) => {
                let kind = kind.parse()?;
                let ordinal = ordinal.trim();
                if ordinal.is_empty() {
                    return Err(DeviceParseError::MissingOrdinal(target.to_string()));
                }
                Ok(Self::Accelerator {
                    kind,
                    ordinal: ordinal.to_string(),
                })
            }
            None if target.chars().all(|c| c.is_ascii_digit()) => Ok(Self::Accelerator {
                kind: HardwareEncoderType::Nvenc,
                ordinal: target.to_string(),
            }),
            None => match target.parse::<HardwareEncoderType>() {
                Ok(_) => Err(DeviceParseError::MissingOrdinal(target.to_string())),
                Err(err) => Err(err),
            },
        }
    }
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Software => f.write_str("software"),
            Self::Accelerator { kind, ordinal } => write!(f, "{}:{}", kind.as_str(), ordinal),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub target: DeviceTarget,
}

/// Fixed, ordered set of encoders established at start-up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevicePool {
    devices: Vec<Device>,
}

impl DevicePool {
    pub fn new(targets: Vec<DeviceTarget>) -> Self {
        let devices = targets
            .into_iter()
            .enumerate()
            .map(|(index, target)| Device {
                id: DeviceId(index),
                target,
            })
            .collect();
        Self { devices }
    }

    /// Parse every entry; entries may themselves be comma separated lists.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, DeviceParseError> {
        let targets = entries
            .iter()
            .flat_map(|entry| entry.as_ref().split(','))
            .filter(|entry| !entry.trim().is_empty())
            .map(str::parse::<DeviceTarget>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(targets))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_targets_in_order() {
        let pool = DevicePool::parse(&["sw", "0,1", "vaapi:/dev/dri/renderD128"]).unwrap();
        let targets: Vec<String> = pool.iter().map(|d| d.target.to_string()).collect();
        assert_eq!(
            targets,
            vec![
                "software",
                "nvenc:0",
                "nvenc:1",
                "vaapi:/dev/dri/renderD128"
            ]
        );
        assert_eq!(pool.get(DeviceId(2)).unwrap().id, DeviceId(2));
    }

    #[test]
    fn rejects_bad_targets() {
        assert_eq!(
            "quantum:0".parse::<DeviceTarget>().unwrap_err(),
            DeviceParseError::UnknownKind("quantum".to_string())
        );
        assert_eq!(
            "qsv".parse::<DeviceTarget>().unwrap_err(),
            DeviceParseError::MissingOrdinal("qsv".to_string())
        );
        assert_eq!(
            "nvenc:".parse::<DeviceTarget>().unwrap_err(),
            DeviceParseError::MissingOrdinal("nvenc:".to_string())
        );
    }

    #[test]
    fn empty_entries_make_an_empty_pool() {
        let pool = DevicePool::parse(&[" , "]).unwrap();
        assert!(pool.is_empty());
    }
}
