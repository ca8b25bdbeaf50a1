use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{EaselError, Result};

/// Hard ceiling the image service places on edit inputs per call.
pub const MAX_SOURCE_IMAGES: usize = 16;

/// Largest number of edited variants a single call may request.
pub const MAX_OUTPUT_COUNT: u32 = 10;

/// Sentinel meaning "let the service pick" for size, quality and background.
pub const AUTO: &str = "auto";

/// Raw user input for the text-to-image action, exactly as collected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateForm {
    pub prompt: String,
    #[serde(default = "default_auto")]
    pub size: String,
    #[serde(default = "default_auto")]
    pub quality: String,
    #[serde(default = "default_auto")]
    pub background: String,
}

impl Default for GenerateForm {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            size: default_auto(),
            quality: default_auto(),
            background: default_auto(),
        }
    }
}

/// Raw user input for the image-edit action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditForm {
    #[serde(default)]
    pub images: Vec<PathBuf>,
    pub prompt: String,
    #[serde(default = "default_count")]
    pub count: u32,
    pub mask: Option<PathBuf>,
    #[serde(default = "default_auto")]
    pub size: String,
    #[serde(default = "default_auto")]
    pub quality: String,
    #[serde(default = "default_auto")]
    pub background: String,
}

impl Default for EditForm {
    fn default() -> Self {
        Self {
            images: Vec::new(),
            prompt: String::new(),
            count: default_count(),
            mask: None,
            size: default_auto(),
            quality: default_auto(),
            background: default_auto(),
        }
    }
}

/// Output dimensions supported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSize {
    #[serde(rename = "1024x1024")]
    Square,
    #[serde(rename = "1536x1024")]
    Landscape,
    #[serde(rename = "1024x1536")]
    Portrait,
}

impl ImageSize {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1024x1024",
            Self::Landscape => "1536x1024",
            Self::Portrait => "1024x1536",
        }
    }

    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Square => (1024, 1024),
            Self::Landscape => (1536, 1024),
            Self::Portrait => (1024, 1536),
        }
    }

    /// Maps form text to a wire value. `auto` and blank mean "unset";
    /// anything unrecognized is a validation failure.
    pub fn parse_opt(raw: &str) -> Result<Option<Self>> {
        match normalize_token(raw).as_str() {
            "" | AUTO => Ok(None),
            "1024x1024" => Ok(Some(Self::Square)),
            "1536x1024" => Ok(Some(Self::Landscape)),
            "1024x1536" => Ok(Some(Self::Portrait)),
            other => Err(EaselError::validation(format!(
                "Unsupported image size '{other}'. Choose auto, 1024x1024, 1536x1024, or 1024x1536."
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    High,
    Medium,
    Low,
}

impl ImageQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn parse_opt(raw: &str) -> Result<Option<Self>> {
        match normalize_token(raw).as_str() {
            "" | AUTO => Ok(None),
            "high" => Ok(Some(Self::High)),
            "medium" => Ok(Some(Self::Medium)),
            "low" => Ok(Some(Self::Low)),
            other => Err(EaselError::validation(format!(
                "Unsupported image quality '{other}'. Choose auto, high, medium, or low."
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Background {
    Transparent,
    Opaque,
}

impl Background {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transparent => "transparent",
            Self::Opaque => "opaque",
        }
    }

    pub fn parse_opt(raw: &str) -> Result<Option<Self>> {
        match normalize_token(raw).as_str() {
            "" | AUTO => Ok(None),
            "transparent" => Ok(Some(Self::Transparent)),
            "opaque" => Ok(Some(Self::Opaque)),
            other => Err(EaselError::validation(format!(
                "Unsupported background '{other}'. Choose auto, transparent, or opaque."
            ))),
        }
    }
}

/// Content-filter strictness forwarded to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Moderation {
    Auto,
    Low,
}

impl Moderation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Low => "low",
        }
    }
}

/// One uploaded source image for an edit, read fully into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// A fully validated request for the hosted image service.
///
/// Optional knobs left at their service-side default are `None` and stay
/// off the wire entirely: serializing this struct yields only the
/// populated JSON fields. Binary attachments (`source_images`, `mask`)
/// travel as multipart parts, never inside the JSON body, so they are
/// excluded from serialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<ImageSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<ImageQuality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<Background>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moderation: Option<Moderation>,
    #[serde(skip_serializing)]
    pub source_images: Vec<SourceImage>,
    /// Normalized RGBA mask, already re-encoded as PNG.
    #[serde(skip_serializing)]
    pub mask: Option<Vec<u8>>,
}

fn normalize_token(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

fn default_auto() -> String {
    AUTO.to_string()
}

fn default_count() -> u32 {
    1
}
