//! Loaded module model and extraction from `eu-unstrip -n` output.
use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::*;
use crate::patterns::{self, ImageMatch};

/// Image type reported for every module.
pub const IMAGE_TYPE_ELF: &str = "elf";

/// Size of a UUID in bytes.
const UUID_SIZE: usize = 16;

/// A loaded binary module.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Image {
    #[serde(rename = "type")]
    pub image_type: String,
    /// Load base, `0x` followed by hex digits.
    #[serde(rename = "image_addr")]
    pub image_address: String,
    pub image_size: u64,
    /// Build id as printed by eu-unstrip.
    pub code_id: String,
    /// Identifier derived from `code_id`, see [`code_id_to_debug_id`].
    pub debug_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub code_file: Option<String>,
}

/// Derive a debug id from an ELF build id.
///
/// The first 16 bytes of the build id are read as a little endian GUID, the
/// same convention crash reporting backends use to match binaries with debug
/// files. Shorter build ids are padded with zeros.
///
/// # Arguments
///
/// * `code_id` - build id as hex string
///
/// # Return value
///
/// Debug id, or error if `code_id` is not valid hex.
pub fn code_id_to_debug_id(code_id: &str) -> Result<Uuid> {
    let bytes = hex::decode(code_id)?;
    let mut data = [0u8; UUID_SIZE];
    let len = bytes.len().min(UUID_SIZE);
    data[..len].copy_from_slice(&bytes[..len]);
    Ok(Uuid::from_bytes_le(data))
}

/// Parse a hex size field like `0x1000`.
fn parse_hex_size(size: &str) -> Option<u64> {
    let digits = size
        .strip_prefix("0x")
        .or_else(|| size.strip_prefix("0X"))
        .unwrap_or(size);
    u64::from_str_radix(digits, 16).ok()
}

impl Image {
    /// Build an image from one module descriptor match.
    ///
    /// # Return value
    ///
    /// `None` if the build id or the size is missing or malformed.
    pub fn from_match(captures: &ImageMatch) -> Option<Self> {
        let code_id = captures.code_id.filter(|id| !id.is_empty())?;
        let image_size = captures.image_size.and_then(parse_hex_size)?;
        let debug_id = match code_id_to_debug_id(code_id) {
            Ok(debug_id) => debug_id,
            Err(error) => {
                debug!("Skipping image at {}: {}", captures.image_addr, error);
                return None;
            }
        };
        Some(Image {
            image_type: IMAGE_TYPE_ELF.to_string(),
            image_address: captures.image_addr.to_string(),
            image_size,
            code_id: code_id.to_string(),
            debug_id,
            code_file: captures.code_file.map(str::to_string),
        })
    }

    /// Parse a single eu-unstrip line.
    pub fn parse(line: &str) -> Option<Self> {
        patterns::match_image(line).and_then(|captures| Image::from_match(&captures))
    }
}

/// Extract all images from `eu-unstrip -n` output, in listing order.
pub fn images_from_unstrip(text: &str) -> Vec<Image> {
    patterns::image_matches(text)
        .filter_map(|captures| Image::from_match(&captures))
        .collect()
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}+{:#x} {} {}",
            self.image_address,
            self.image_size,
            self.debug_id,
            self.code_file.as_deref().unwrap_or("-")
        )
    }
}
