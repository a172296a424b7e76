//! Naming convention for chunks and manifests.
//!
//! Chunk `i` of item `movie.mp4` is stored as `movie.mp4.span-chunk-0003`;
//! its manifest as `movie.mp4.span-manifest`. Ordinals are zero-padded to at
//! least four digits so that lexical order matches ordinal order below 10,000.

use spanstore_common::{ContentId, Result};

/// Separator between a parent id and a chunk ordinal.
pub const CHUNK_SUFFIX: &str = ".span-chunk-";

/// Suffix of a manifest id.
pub const MANIFEST_SUFFIX: &str = ".span-manifest";

/// Mimetype of stored manifests.
pub const MANIFEST_MIMETYPE: &str = "application/x-spanstore-manifest+json";

/// Id of chunk `ordinal` of `parent`.
pub fn chunk_id(parent: &ContentId, ordinal: u32) -> Result<ContentId> {
    parent.with_suffix(&format!("{}{:04}", CHUNK_SUFFIX, ordinal))
}

/// Id of the manifest describing `parent`.
pub fn manifest_id(parent: &ContentId) -> Result<ContentId> {
    parent.with_suffix(MANIFEST_SUFFIX)
}

/// Listing prefix shared by every chunk of `parent`.
pub fn chunk_prefix(parent: &ContentId) -> String {
    format!("{}{}", parent, CHUNK_SUFFIX)
}

/// Split a chunk id into its parent id and ordinal.
///
/// Only canonical encodings are accepted: `x.span-chunk-0001` parses,
/// `x.span-chunk-1` and `x.span-chunk-00001` do not.
pub fn parse_chunk_id(id: &str) -> Option<(&str, u32)> {
    let (parent, digits) = id.rsplit_once(CHUNK_SUFFIX)?;
    if parent.is_empty() || digits.len() < 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let ordinal: u32 = digits.parse().ok()?;
    (format!("{:04}", ordinal) == digits).then_some((parent, ordinal))
}

/// Parent id of a manifest id.
pub fn parse_manifest_id(id: &str) -> Option<&str> {
    id.strip_suffix(MANIFEST_SUFFIX)
        .filter(|parent| !parent.is_empty())
}

/// Whether `id` is reserved for chunk or manifest storage.
pub fn is_reserved(id: &str) -> bool {
    parse_chunk_id(id).is_some() || parse_manifest_id(id).is_some()
}
