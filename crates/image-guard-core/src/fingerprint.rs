//! Perceptual fingerprints (difference hash).
//!
//! An image is downscaled to a 9×8 grid, converted to grayscale, and each
//! cell is compared with its right-hand neighbour. The 8 comparisons per row
//! over 8 rows pack into a 64-bit [`Fingerprint`], most significant bit
//! first. Two fingerprints are compared by Hamming distance.
//!
//! # Match Policy
//!
//! Two images are treated as fingerprint-identical when their distance is
//! at most [`DEFAULT_MATCH_THRESHOLD`] (8 of 64 bits). That tolerates
//! recompression and light resizing while rejecting unrelated images.
//!
//! ```rust
//! use image_guard_core::fingerprint::{hamming_distance, Fingerprint};
//!
//! let a = Fingerprint::from_bits(0b1011);
//! let b = Fingerprint::from_bits(0b0011);
//! assert_eq!(hamming_distance(a, b), 1);
//! assert_eq!(a.to_hex(), "000000000000000b");
//! ```

use std::fmt;

use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{GuardError, Result};

/// Grid width: one more column than there are comparisons per row.
pub const GRID_WIDTH: u32 = 9;
/// Grid height: one row of comparisons per grid row.
pub const GRID_HEIGHT: u32 = 8;
/// Number of bits in a fingerprint.
pub const FINGERPRINT_BITS: u32 = (GRID_WIDTH - 1) * GRID_HEIGHT;
/// Maximum Hamming distance at which two fingerprints match.
pub const DEFAULT_MATCH_THRESHOLD: u32 = 8;

/// A 64-bit perceptual fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn from_bits(bits: u64) -> Self {
        Fingerprint(bits)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Fingerprint an already decoded image.
    pub fn from_image(image: &DynamicImage) -> Self {
        let grid = image
            .resize_exact(GRID_WIDTH, GRID_HEIGHT, FilterType::Triangle)
            .to_luma8();

        let mut bits = 0u64;
        for y in 0..GRID_HEIGHT {
            for x in 0..GRID_WIDTH - 1 {
                let left = grid.get_pixel(x, y)[0];
                let right = grid.get_pixel(x + 1, y)[0];
                bits = (bits << 1) | u64::from(left > right);
            }
        }
        Fingerprint(bits)
    }

    /// Decode encoded image bytes (PNG, JPEG) and fingerprint them.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| GuardError::Fingerprint(format!("cannot decode image: {}", e)))?;
        Ok(Self::from_image(&image))
    }

    /// Number of differing bits.
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_be_bytes())
    }

    /// Parse exactly 16 hex digits.
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut buf = [0u8; 8];
        hex::decode_to_slice(s, &mut buf)
            .map_err(|e| GuardError::InvalidInput(format!("invalid fingerprint '{}': {}", s, e)))?;
        Ok(Fingerprint(u64::from_be_bytes(buf)))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Decode and fingerprint image bytes.
pub fn compute_fingerprint(bytes: &[u8]) -> Result<Fingerprint> {
    Fingerprint::from_bytes(bytes)
}

/// Count of differing bit positions.
pub fn hamming_distance(a: Fingerprint, b: Fingerprint) -> u32 {
    a.distance(&b)
}

/// True when both fingerprints are present and within `threshold` bits.
pub fn fingerprints_match(
    a: Option<&Fingerprint>,
    b: Option<&Fingerprint>,
    threshold: u32,
) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.distance(b) <= threshold,
        _ => false,
    }
}
