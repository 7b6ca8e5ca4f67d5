//! Whole-message payload assembly.
//!
//! A payload is up to three segments, each optional:
//!
//! ```text
//! [text]  [m> image links  [v> video links
//! ```
//!
//! The text segment is either 5-bit compressed text with no marker, or
//! `[u>` followed by raw UTF-8 when compression is impossible, does not
//! save space, or would produce marker bytes. Segment boundaries are found
//! by scanning for the next marker, so no segment ever contains a marker
//! that a later segment could be mistaken for.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::links::{compress_link, decompress_link, desimplify_links, simplify_links};
use super::text::{compress_text, decompress_text};
use crate::error::{ProtocolError, Result};

pub const MARKER_LITERAL: &[u8; 3] = b"[u>";
pub const MARKER_IMAGES: &[u8; 3] = b"[m>";
pub const MARKER_VIDEOS: &[u8; 3] = b"[v>";

/// Text starting with this is a structured link reference, sent uncompressed.
pub const LINK_REFERENCE_PREFIX: &str = "g//";

/// The user-visible content of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video_urls: Vec<String>,
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Default::default() }
    }

    pub fn with_images(mut self, urls: Vec<String>) -> Self {
        self.image_urls = urls;
        self
    }

    pub fn with_videos(mut self, urls: Vec<String>) -> Self {
        self.video_urls = urls;
        self
    }

    pub fn has_media(&self) -> bool {
        !self.image_urls.is_empty() || !self.video_urls.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && !self.has_media()
    }
}

/// Payload bytes plus how the text segment was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub bytes: Vec<u8>,
    /// Text went out as `[u>` + raw UTF-8
    pub literal_text: bool,
}

/// Serialize `body` into payload bytes.
///
/// Fails if a URL holds a character the link codec cannot express, or if a
/// segment cannot be written without containing a marker.
pub fn build_payload(body: &MessageBody) -> Result<Vec<u8>> {
    encode_payload(body).map(|payload| payload.bytes)
}

/// [`build_payload`], also reporting whether the text took the literal form.
pub fn encode_payload(body: &MessageBody) -> Result<EncodedPayload> {
    let mut bytes = Vec::new();
    let mut literal_text = false;

    if !body.text.is_empty() {
        let (literal, segment) = text_segment(&body.text)?;
        literal_text = literal;
        bytes.extend_from_slice(&segment);
    }

    if !body.image_urls.is_empty() {
        bytes.extend_from_slice(MARKER_IMAGES);
        bytes.extend_from_slice(&image_segment(&body.image_urls)?);
    }
    if !body.video_urls.is_empty() {
        // Last segment, nothing scans past it
        bytes.extend_from_slice(MARKER_VIDEOS);
        bytes.extend_from_slice(&compress_link(&simplify_links(&body.video_urls))?);
    }

    Ok(EncodedPayload { bytes, literal_text })
}

/// Packed text when it is smaller and marker-free, otherwise the literal form.
fn text_segment(text: &str) -> Result<(bool, Vec<u8>)> {
    match compress_text(text) {
        Ok(packed) if packed.len() >= text.len() => {
            debug!("Compression saves nothing ({} >= {} bytes), sending literal", packed.len(), text.len());
        }
        Ok(packed) if packed.starts_with(MARKER_LITERAL) || contains_media_marker(&packed) => {
            debug!("Packed text contains a segment marker, sending literal");
        }
        Ok(packed) => {
            debug!("Compressed text {} -> {} bytes", text.len(), packed.len());
            return Ok((false, packed));
        }
        Err(ProtocolError::UnsupportedCharacter(c)) => {
            debug!("Unsupported character {:?}, sending literal", c);
        }
        Err(e) => return Err(e),
    }

    if contains_media_marker(text.as_bytes()) {
        return Err(ProtocolError::MarkerCollision("literal text"));
    }
    let mut segment = Vec::with_capacity(MARKER_LITERAL.len() + text.len());
    segment.extend_from_slice(MARKER_LITERAL);
    segment.extend_from_slice(text.as_bytes());
    Ok((true, segment))
}

/// Packed image links free of the video marker. Reordering the list changes
/// the simplified string, so each rotation is tried before giving up.
fn image_segment(urls: &[String]) -> Result<Vec<u8>> {
    let mut ordered = urls.to_vec();
    for _ in 0..urls.len() {
        let packed = compress_link(&simplify_links(&ordered))?;
        if find_marker(&packed, MARKER_VIDEOS).is_none() {
            return Ok(packed);
        }
        debug!("Packed image links contain the video marker, reordering");
        ordered.rotate_left(1);
    }
    Err(ProtocolError::MarkerCollision("image links"))
}

/// Split payload bytes back into a [`MessageBody`]. Never fails; undecodable
/// parts come back empty or lossily converted.
pub fn parse_payload(payload: &[u8]) -> MessageBody {
    let mut body = MessageBody::default();
    let mut rest = payload;

    if let Some(literal) = rest.strip_prefix(MARKER_LITERAL.as_slice()) {
        let end = next_media_marker(literal).unwrap_or(literal.len());
        body.text = String::from_utf8_lossy(&literal[..end]).into_owned();
        rest = &literal[end..];
    } else if !starts_with_media_marker(rest) {
        let end = next_media_marker(rest).unwrap_or(rest.len());
        body.text = decompress_text(&rest[..end]);
        rest = &rest[end..];
    }

    if let Some(images) = rest.strip_prefix(MARKER_IMAGES.as_slice()) {
        let end = find_marker(images, MARKER_VIDEOS).unwrap_or(images.len());
        body.image_urls = desimplify_links(&decompress_link(&images[..end]));
        rest = &images[end..];
    }
    if let Some(videos) = rest.strip_prefix(MARKER_VIDEOS.as_slice()) {
        body.video_urls = desimplify_links(&decompress_link(videos));
    }

    body
}

fn starts_with_media_marker(bytes: &[u8]) -> bool {
    bytes.starts_with(MARKER_IMAGES) || bytes.starts_with(MARKER_VIDEOS)
}

fn contains_media_marker(bytes: &[u8]) -> bool {
    next_media_marker(bytes).is_some()
}

fn next_media_marker(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(MARKER_IMAGES.len())
        .position(|w| w == MARKER_IMAGES || w == MARKER_VIDEOS)
}

fn find_marker(bytes: &[u8], marker: &[u8; 3]) -> Option<usize> {
    bytes.windows(marker.len()).position(|w| w == marker)
}
