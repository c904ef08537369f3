// SPDX-License-Identifier: MPL-2.0

//! Core types for frame decoding results
//!
//! These types describe what a decoder saw in one frame and which code
//! formats a session is willing to accept.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A rectangular region within a frame
///
/// Coordinates are normalized (0.0 to 1.0) relative to the frame dimensions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRegion {
    /// Left edge (0.0 = left of frame, 1.0 = right of frame)
    pub x: f32,
    /// Top edge (0.0 = top of frame, 1.0 = bottom of frame)
    pub y: f32,
    /// Width as fraction of frame width
    pub width: f32,
    /// Height as fraction of frame height
    pub height: f32,
}

impl FrameRegion {
    /// Create a frame region from pixel coordinates
    pub fn from_pixels(
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let fw = frame_width.max(1) as f32;
        let fh = frame_height.max(1) as f32;
        Self {
            x: x as f32 / fw,
            y: y as f32 / fh,
            width: width as f32 / fw,
            height: height as f32 / fh,
        }
    }
}

/// Machine-readable code format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Symbology {
    #[serde(rename = "QR_CODE")]
    QrCode,
    #[serde(rename = "CODE_128")]
    Code128,
    #[serde(rename = "CODE_39")]
    Code39,
    #[serde(rename = "CODE_93")]
    Code93,
    #[serde(rename = "EAN_13")]
    Ean13,
    #[serde(rename = "EAN_8")]
    Ean8,
    #[serde(rename = "UPC_A")]
    UpcA,
    #[serde(rename = "UPC_E")]
    UpcE,
    #[serde(rename = "ITF")]
    Itf,
    #[serde(rename = "CODABAR")]
    Codabar,
    #[serde(rename = "DATA_MATRIX")]
    DataMatrix,
    #[serde(rename = "PDF_417")]
    Pdf417,
    #[serde(rename = "AZTEC")]
    Aztec,
}

impl Symbology {
    pub const ALL: [Symbology; 13] = [
        Symbology::QrCode,
        Symbology::Code128,
        Symbology::Code39,
        Symbology::Code93,
        Symbology::Ean13,
        Symbology::Ean8,
        Symbology::UpcA,
        Symbology::UpcE,
        Symbology::Itf,
        Symbology::Codabar,
        Symbology::DataMatrix,
        Symbology::Pdf417,
        Symbology::Aztec,
    ];

    /// Subset used when the caller does not name any formats. Covers the
    /// warehouse labels and product codes that make up nearly all scans
    /// while keeping per-frame decode work small.
    pub const CONSERVATIVE: [Symbology; 4] = [
        Symbology::Code128,
        Symbology::Ean13,
        Symbology::Ean8,
        Symbology::QrCode,
    ];

    /// Canonical upper-case name (`CODE_128`, `EAN_13`, ...)
    pub fn name(&self) -> &'static str {
        match self {
            Symbology::QrCode => "QR_CODE",
            Symbology::Code128 => "CODE_128",
            Symbology::Code39 => "CODE_39",
            Symbology::Code93 => "CODE_93",
            Symbology::Ean13 => "EAN_13",
            Symbology::Ean8 => "EAN_8",
            Symbology::UpcA => "UPC_A",
            Symbology::UpcE => "UPC_E",
            Symbology::Itf => "ITF",
            Symbology::Codabar => "CODABAR",
            Symbology::DataMatrix => "DATA_MATRIX",
            Symbology::Pdf417 => "PDF_417",
            Symbology::Aztec => "AZTEC",
        }
    }

    /// One-dimensional bar codes
    pub fn is_linear(&self) -> bool {
        matches!(
            self,
            Symbology::Code128
                | Symbology::Code39
                | Symbology::Code93
                | Symbology::Ean13
                | Symbology::Ean8
                | Symbology::UpcA
                | Symbology::UpcE
                | Symbology::Itf
                | Symbology::Codabar
        )
    }

    /// Dense 2D symbols that need more pixels than QR
    pub fn is_dense_2d(&self) -> bool {
        matches!(
            self,
            Symbology::DataMatrix | Symbology::Pdf417 | Symbology::Aztec
        )
    }
}

impl std::fmt::Display for Symbology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Symbology {
    type Err = String;

    /// Accepts `CODE_128`, `code128`, `code-128`, `qr`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();

        if normalized == "QR" {
            return Ok(Symbology::QrCode);
        }

        Symbology::ALL
            .into_iter()
            .find(|sym| sym.name().replace('_', "") == normalized)
            .ok_or_else(|| format!("Unknown symbology: {}", s))
    }
}

/// Which symbologies a session accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbologyFilter {
    /// Every format the decoder can produce is accepted
    Any,
    /// Only the listed formats, in caller order
    Only(Vec<Symbology>),
}

impl Default for SymbologyFilter {
    fn default() -> Self {
        SymbologyFilter::Only(Symbology::CONSERVATIVE.to_vec())
    }
}

impl SymbologyFilter {
    /// Build a filter from a caller list. Duplicates are dropped keeping the
    /// first occurrence; an empty list yields the conservative default.
    pub fn only(symbologies: impl IntoIterator<Item = Symbology>) -> Self {
        let mut ordered: Vec<Symbology> = Vec::new();
        for sym in symbologies {
            if !ordered.contains(&sym) {
                ordered.push(sym);
            }
        }

        if ordered.is_empty() {
            Self::default()
        } else {
            SymbologyFilter::Only(ordered)
        }
    }

    pub fn allows(&self, symbology: Symbology) -> bool {
        match self {
            SymbologyFilter::Any => true,
            SymbologyFilter::Only(list) => list.contains(&symbology),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, SymbologyFilter::Any)
    }

    /// Listed symbologies; every known one for [`SymbologyFilter::Any`]
    pub fn iter(&self) -> impl Iterator<Item = Symbology> + '_ {
        let list: &[Symbology] = match self {
            SymbologyFilter::Any => &Symbology::ALL,
            SymbologyFilter::Only(list) => list,
        };
        list.iter().copied()
    }
}

impl std::fmt::Display for SymbologyFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbologyFilter::Any => write!(f, "any"),
            SymbologyFilter::Only(list) => {
                let names: Vec<&str> = list.iter().map(|s| s.name()).collect();
                write!(f, "{}", names.join(","))
            }
        }
    }
}

/// Decoder tuning passed alongside the allowed symbologies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeOptions {
    /// Inspect frames at full resolution instead of a downscaled copy
    pub thorough: bool,
}

/// A code found in a frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decoded {
    pub text: String,
    pub symbology: Symbology,
    /// Where in the frame the code was found, if the decoder knows
    pub bounds: Option<FrameRegion>,
}

impl Decoded {
    pub fn new(text: impl Into<String>, symbology: Symbology) -> Self {
        Self {
            text: text.into(),
            symbology,
            bounds: None,
        }
    }
}

/// What the decoder reports for one inspected frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Decoded(Decoded),
    /// Nothing decodable in this frame. Not an error.
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbology_names() {
        assert_eq!("CODE_128".parse::<Symbology>(), Ok(Symbology::Code128));
        assert_eq!("code128".parse::<Symbology>(), Ok(Symbology::Code128));
        assert_eq!("ean-13".parse::<Symbology>(), Ok(Symbology::Ean13));
        assert_eq!("qr".parse::<Symbology>(), Ok(Symbology::QrCode));
        assert_eq!("pdf417".parse::<Symbology>(), Ok(Symbology::Pdf417));
        assert!("maxicode".parse::<Symbology>().is_err());
    }

    #[test]
    fn test_empty_filter_is_conservative_default() {
        let filter = SymbologyFilter::only(Vec::new());
        assert_eq!(filter, SymbologyFilter::default());
        assert!(filter.allows(Symbology::Code128));
        assert!(!filter.allows(Symbology::Pdf417));
    }

    #[test]
    fn test_filter_keeps_caller_order_without_duplicates() {
        let filter =
            SymbologyFilter::only([Symbology::Ean13, Symbology::Code128, Symbology::Ean13]);
        let listed: Vec<Symbology> = filter.iter().collect();
        assert_eq!(listed, vec![Symbology::Ean13, Symbology::Code128]);
    }

    #[test]
    fn test_any_allows_everything() {
        for sym in Symbology::ALL {
            assert!(SymbologyFilter::Any.allows(sym));
        }
    }

    #[test]
    fn test_symbology_serde_uses_canonical_names() {
        let json = serde_json::to_string(&Symbology::Ean13).unwrap();
        assert_eq!(json, "\"EAN_13\"");
        let back: Symbology = serde_json::from_str("\"CODE_128\"").unwrap();
        assert_eq!(back, Symbology::Code128);
    }

    #[test]
    fn test_frame_region_from_pixels() {
        let region = FrameRegion::from_pixels(160, 120, 320, 240, 640, 480);
        assert_eq!(region.x, 0.25);
        assert_eq!(region.height, 0.5);
    }
}
