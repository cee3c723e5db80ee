//! Content fingerprints comparable with object-store entity tags.
//!
//! A single-request upload gets the MD5 of the whole content as ETag. A
//! multipart upload gets the MD5 of the concatenated part digests followed by
//! `-<part count>`, so large files are fingerprinted the same way.

use crate::Result;
use md5::{Digest, Md5};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// How a file of a given size is transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartLayout {
    /// Files at or above this size are uploaded in parts
    pub multipart_threshold: u64,

    /// Size of each part
    pub part_size: u64,
}

impl PartLayout {
    pub fn is_multipart(&self, size: u64) -> bool {
        size >= self.multipart_threshold
    }
}

/// Compute the fingerprint of `path` for a file of `size` bytes.
pub fn file_fingerprint(path: &Path, size: u64, layout: PartLayout) -> Result<String> {
    let mut file = File::open(path)?;

    if !layout.is_multipart(size) {
        let mut hasher = Md5::new();
        std::io::copy(&mut file, &mut hasher)?;
        return Ok(hex::encode(hasher.finalize()));
    }

    let mut parts = Vec::new();
    let mut buffer = vec![0u8; layout.part_size as usize];
    loop {
        let filled = read_part(&mut file, &mut buffer)?;
        if filled == 0 {
            break;
        }
        parts.push(Md5::digest(&buffer[..filled]));
        if filled < buffer.len() {
            break;
        }
    }

    Ok(multipart_etag(&parts))
}

/// Fingerprint of an in-memory body uploaded in a single request.
pub fn bytes_fingerprint(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Entity tag of a multipart object from its part digests.
pub fn multipart_etag<D: AsRef<[u8]>>(part_digests: &[D]) -> String {
    let mut hasher = Md5::new();
    for digest in part_digests {
        hasher.update(digest.as_ref());
    }
    format!("{}-{}", hex::encode(hasher.finalize()), part_digests.len())
}

/// Strip the quotes object stores put around entity tags.
pub fn normalize_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

/// Fill `buffer` from `reader` until full or end of file.
pub fn read_part<R: Read>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
