//! Shared data structures for the kiosk
//!
//! These structs represent the data model that flows between
//! the gateways, the workflow, the join coordinator and the scan store.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;

/// Scene used when the analysis names none, or names one we don't know
pub const DEFAULT_VR_SCENE: &str = "neolitik";

/// An encoded image plus its MIME type
///
/// Used for captured stills, generated enhancements and stored images alike.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// Logical format tag, e.g. "image/jpeg"
    mime: String,
    /// Encoded bytes (JPEG, PNG, ...), never empty
    bytes: Vec<u8>,
}

impl ImagePayload {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    /// Build a payload from raw bytes, detecting the format from its magic number
    pub fn sniffed(bytes: Vec<u8>) -> Result<Self, PayloadError> {
        if bytes.is_empty() {
            return Err(PayloadError::Empty);
        }
        let format = image::guess_format(&bytes).map_err(|_| PayloadError::UnknownFormat)?;
        Ok(Self::new(format.to_mime_type(), bytes))
    }

    /// Parse either bare base64 or a `data:<mime>;base64,<body>` URL
    ///
    /// When the MIME type is missing it is sniffed from the decoded bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, PayloadError> {
        let encoded = encoded.trim();
        let (mime, body) = match encoded.strip_prefix("data:") {
            Some(rest) => {
                let (header, body) = rest.split_once(',').ok_or(PayloadError::Empty)?;
                let mime = header.split(';').next().unwrap_or_default();
                (Some(mime).filter(|m| !m.is_empty()), body)
            }
            None => (None, encoded),
        };

        let bytes = STANDARD.decode(body.trim())?;
        match mime {
            Some(mime) if !bytes.is_empty() => Ok(Self::new(mime, bytes)),
            _ => Self::sniffed(bytes),
        }
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Render as a `data:` URL, the form stored in the scan database
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.to_base64())
    }
}

// Image bytes are noise in logs; show the shape instead
impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Description of the VR scene matched to an artifact's era
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrSceneInfo {
    pub id: String,
    pub name: String,
    pub period: String,
    pub description: String,
}

impl VrSceneInfo {
    /// Look up one of the scenes the VR station can load
    pub fn catalog(id: &str) -> Option<VrSceneInfo> {
        let (name, period, description) = match id {
            "neolitik" => (
                "Neolithic Age",
                "10,000 – 6,000 BC",
                "New Stone Age: settled life, farming, early pottery",
            ),
            "kalkolitik" => (
                "Chalcolithic Age (Copper Age)",
                "5,500 – 3,000 BC",
                "Copper working, mud-brick houses, agricultural growth",
            ),
            "tunc" => (
                "Bronze Age",
                "3,300 – 1,200 BC",
                "Urbanization, first kingdoms, bronze alloy technology",
            ),
            _ => return None,
        };
        Some(VrSceneInfo {
            id: id.to_string(),
            name: name.to_string(),
            period: period.to_string(),
            description: description.to_string(),
        })
    }

    /// Settle the scene id and info reported by the analysis
    ///
    /// Unknown ids fall back to [`DEFAULT_VR_SCENE`]; missing info is filled from the catalog.
    pub fn resolve(id: Option<&str>, info: Option<VrSceneInfo>) -> (String, VrSceneInfo) {
        let id = id
            .map(str::trim)
            .filter(|id| Self::catalog(id).is_some())
            .unwrap_or(DEFAULT_VR_SCENE);

        let info = info
            .filter(|info| info.id == id)
            .or_else(|| Self::catalog(id))
            .unwrap_or_else(|| VrSceneInfo {
                id: id.to_string(),
                name: String::new(),
                period: String::new(),
                description: String::new(),
            });

        (id.to_string(), info)
    }
}

/// Structured result of analyzing one captured image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    /// Artifact name
    pub name: String,
    /// Dating, e.g. "3rd century BC"
    pub era: String,
    /// Long-form description
    pub description: String,
    /// Historical use of the artifact
    pub usage: String,
    /// How the piece could be conserved (None if the backend gave nothing)
    pub conservation_advice: Option<String>,
    /// Prompt for the enhancement images
    /// - Some: enhancements are generated for this scan
    /// - None: the scan is persisted right away without enhancements
    pub visual_prompt: Option<String>,
    /// VR scene id ("neolitik", "kalkolitik" or "tunc")
    pub vr_scene_id: String,
    /// Details for the VR scene
    pub vr_scene_info: VrSceneInfo,
}

impl AnalysisResult {
    /// Prompt to hand to the enhancement gateway, if enhancements should run
    pub fn enhancement_prompt(&self) -> Option<&str> {
        self.visual_prompt
            .as_deref()
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty())
    }
}

/// The two enhancement images generated per scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnhancementPurpose {
    /// The artifact as it looked when new
    Restoration,
    /// Design render used for the 3D relief view
    ThreeDDesign,
}

impl EnhancementPurpose {
    pub const ALL: [EnhancementPurpose; 2] = [
        EnhancementPurpose::Restoration,
        EnhancementPurpose::ThreeDDesign,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            EnhancementPurpose::Restoration => "restoration",
            EnhancementPurpose::ThreeDDesign => "3D design",
        }
    }
}

impl fmt::Display for EnhancementPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// In-memory identity of one scan attempt
///
/// Keys the enhancement join and tags every async completion, so results for
/// a scan the workflow has moved past can be recognized and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScanId(pub u64);

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Database id of a stored scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScanRecordId(pub i64);

impl fmt::Display for ScanRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A scan ready to be written to the store
///
/// `id` and `created_at` are assigned by the store, never here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScanRecord {
    pub name: String,
    pub era: String,
    pub description: String,
    pub usage: String,
    pub conservation_advice: Option<String>,
    pub vr_scene: String,
    pub vr_scene_info: VrSceneInfo,
    pub captured_image: ImagePayload,
    /// None when not requested or when generation failed
    pub restoration_image: Option<ImagePayload>,
    /// None when not requested or when generation failed
    pub three_d_design_image: Option<ImagePayload>,
}

impl NewScanRecord {
    /// Record for a scan with no enhancement images
    pub fn from_analysis(analysis: &AnalysisResult, captured: &ImagePayload) -> Self {
        Self {
            name: analysis.name.clone(),
            era: analysis.era.clone(),
            description: analysis.description.clone(),
            usage: analysis.usage.clone(),
            conservation_advice: analysis.conservation_advice.clone(),
            vr_scene: analysis.vr_scene_id.clone(),
            vr_scene_info: analysis.vr_scene_info.clone(),
            captured_image: captured.clone(),
            restoration_image: None,
            three_d_design_image: None,
        }
    }
}

/// What the store hands back after a successful persist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredScan {
    pub id: ScanRecordId,
    pub created_at: DateTime<Utc>,
}

/// A scan as it lives in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub id: ScanRecordId,
    pub created_at: DateTime<Utc>,
    pub content: NewScanRecord,
}

impl ScanRecord {
    /// Rebuild the analysis this record came from
    ///
    /// The visual prompt is cleared so no enhancement is triggered again.
    pub fn to_analysis(&self) -> AnalysisResult {
        AnalysisResult {
            name: self.content.name.clone(),
            era: self.content.era.clone(),
            description: self.content.description.clone(),
            usage: self.content.usage.clone(),
            conservation_advice: self.content.conservation_advice.clone(),
            visual_prompt: None,
            vr_scene_id: self.content.vr_scene.clone(),
            vr_scene_info: self.content.vr_scene_info.clone(),
        }
    }
}

/// Normalize "absent" and "empty" to a single `None`
pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
