use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image_hasher::{HashAlg, HasherConfig, ImageHash};

/// Frames closer than this are treated as the same picture.
pub const PHASH_CHANGE_THRESHOLD: u32 = 8;

/// Strips a `data:<mime>;base64,` prefix if the page sent a data URL.
fn strip_data_url(encoded: &str) -> &str {
    match encoded.split_once(";base64,") {
        Some((prefix, body)) if prefix.starts_with("data:") => body,
        _ => encoded,
    }
}

pub fn decode_frame(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(strip_data_url(encoded).trim())
        .context("frame is not valid base64")
}

pub fn compute_phash(image_bytes: &[u8]) -> Result<String> {
    let img = image::load_from_memory(image_bytes).context("failed to decode frame image")?;
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::DoubleGradient)
        .hash_size(8, 8)
        .to_hasher();

    let hash = hasher.hash_image(&img);
    Ok(hash.to_base64())
}

pub fn compute_frame_phash(encoded: &str) -> Result<String> {
    compute_phash(&decode_frame(encoded)?)
}

pub fn compute_hamming_distance(lhs: &str, rhs: &str) -> u32 {
    let Ok(h1) = ImageHash::<Vec<u8>>::from_base64(lhs) else {
        return u32::MAX;
    };
    let Ok(h2) = ImageHash::<Vec<u8>>::from_base64(rhs) else {
        return u32::MAX;
    };
    h1.dist(&h2)
}

pub fn is_same_frame(lhs: &str, rhs: &str) -> bool {
    compute_hamming_distance(lhs, rhs) < PHASH_CHANGE_THRESHOLD
}
