//! Palette helpers used by the workflow's stand-in nodes
//!
//! Palettes are six RGB triplets stored in state as `[[r, g, b], ...]`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// Number of colors a palette needs before it can be used for recoloring
pub const PALETTE_SIZE: usize = 6;

pub type Rgb = [u8; 3];

/// One palette offered to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaletteCandidate {
    pub colors: Vec<Rgb>,
    pub source: String,
    pub description: String,
}

impl PaletteCandidate {
    pub fn new(colors: Vec<Rgb>, source: &str, description: impl Into<String>) -> Self {
        Self {
            colors,
            source: source.to_string(),
            description: description.into(),
        }
    }
}

fn hex_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"#([0-9a-fA-F]{6}|[0-9a-fA-F]{3})\b").ok())
        .as_ref()
}

/// Every `#rrggbb` / `#rgb` code in `text`, in order
pub fn parse_hex_colors(text: &str) -> Vec<Rgb> {
    let Some(pattern) = hex_pattern() else {
        return Vec::new();
    };
    pattern
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| hex_to_rgb(m.as_str()))
        .collect()
}

fn hex_to_rgb(hex: &str) -> Option<Rgb> {
    let expanded: String = if hex.len() == 3 {
        hex.chars().flat_map(|c| [c, c]).collect()
    } else {
        hex.to_string()
    };
    let channel = |i: usize| u8::from_str_radix(expanded.get(i..i + 2)?, 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

pub fn to_hex(palette: &[Rgb]) -> String {
    palette
        .iter()
        .map(|[r, g, b]| format!("#{:02x}{:02x}{:02x}", r, g, b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read a palette field; `None` unless every entry is a valid triplet
pub fn from_value(value: Option<&Value>) -> Option<Vec<Rgb>> {
    serde_json::from_value(value?.clone()).ok()
}

/// A palette is ready when it has exactly six colors
pub fn is_ready(value: Option<&Value>) -> bool {
    from_value(value).is_some_and(|p| p.len() == PALETTE_SIZE)
}

/// Extend a short palette to six colors by repeating the last one
pub fn pad(colors: &[Rgb]) -> Vec<Rgb> {
    let mut padded: Vec<Rgb> = colors.iter().take(PALETTE_SIZE).copied().collect();
    while let Some(&last) = padded.last() {
        if padded.len() >= PALETTE_SIZE {
            break;
        }
        padded.push(last);
    }
    padded
}

const WARM: [Rgb; 6] = [
    [178, 34, 34],
    [255, 127, 80],
    [255, 191, 0],
    [204, 85, 0],
    [240, 220, 180],
    [110, 44, 30],
];

const COOL: [Rgb; 6] = [
    [25, 55, 109],
    [70, 130, 180],
    [0, 128, 128],
    [152, 216, 200],
    [220, 235, 245],
    [60, 60, 90],
];

const EARTH: [Rgb; 6] = [
    [85, 107, 47],
    [139, 115, 85],
    [194, 178, 128],
    [160, 82, 45],
    [245, 245, 220],
    [47, 79, 79],
];

/// Preset palette matching the mood words in `description`
pub fn describe(description: &str) -> PaletteCandidate {
    let text = description.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| text.contains(w));
    if has(&["warm", "autumn", "sunset", "fire", "red", "orange"]) {
        PaletteCandidate::new(WARM.to_vec(), "preset", "Warm palette")
    } else if has(&["cool", "ocean", "winter", "blue", "sea", "ice"]) {
        PaletteCandidate::new(COOL.to_vec(), "preset", "Cool palette")
    } else {
        PaletteCandidate::new(EARTH.to_vec(), "preset", "Earthy palette")
    }
}

/// Six colors derived from an image name (FNV-1a over the bytes)
pub fn extract(image_name: &str) -> Vec<Rgb> {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in image_name.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (0..PALETTE_SIZE)
        .map(|i| {
            let bits = hash.rotate_left((i as u32) * 11);
            [bits as u8, (bits >> 8) as u8, (bits >> 16) as u8]
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variation {
    Warmer,
    Cooler,
    Complementary,
}

impl Variation {
    /// Variation asked for in `text`; warmer unless another kind is named
    pub fn detect(text: &str) -> Self {
        let text = text.to_lowercase();
        if text.contains("cool") || text.contains("blue") {
            Variation::Cooler
        } else if text.contains("complement") || text.contains("opposite") || text.contains("invert") {
            Variation::Complementary
        } else {
            Variation::Warmer
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Variation::Warmer => "Warmer",
            Variation::Cooler => "Cooler",
            Variation::Complementary => "Complementary",
        }
    }

    pub fn apply(&self, palette: &[Rgb]) -> Vec<Rgb> {
        palette
            .iter()
            .map(|&[r, g, b]| match self {
                Variation::Warmer => [r.saturating_add(30), g, b.saturating_sub(20)],
                Variation::Cooler => [r.saturating_sub(20), g, b.saturating_add(30)],
                Variation::Complementary => [255 - r, 255 - g, 255 - b],
            })
            .collect()
    }
}
