//! Bit-level payload compression for short text and URL lists.

pub mod bits;
pub mod links;
pub mod payload;
pub mod text;

pub use links::{compress_link, decompress_link, desimplify_links, simplify_links, split_link_list};
pub use payload::{
    build_payload, encode_payload, parse_payload, EncodedPayload, MessageBody, LINK_REFERENCE_PREFIX, MARKER_IMAGES,
    MARKER_LITERAL, MARKER_VIDEOS,
};
pub use text::{compress_text, decompress_text};
