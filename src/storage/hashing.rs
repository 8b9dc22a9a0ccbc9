//! Incremental content hashing.
//!
//! Git addresses an object by the SHA-1 of `"<type> <len>\0"` followed by
//! the payload. [`HashingWriter`] feeds every byte written through it into
//! the digest while forwarding it to an inner sink, so the payload is hashed
//! and buffered in a single pass.

use std::io::{self, Write};

use sha1::{Digest, Sha1};

use crate::storage::types::{ObjectId, ObjectKind};

/// build the synthetic object header
pub fn object_header(kind: ObjectKind, length: u64) -> Vec<u8> {
    let mut header = Vec::with_capacity(kind.type_name().len() + 22);
    header.extend_from_slice(kind.type_name().as_bytes());
    header.push(b' ');
    header.extend_from_slice(length.to_string().as_bytes());
    header.push(0);
    header
}

/// compute the id of an object without storing it
pub fn id_for(kind: ObjectKind, data: &[u8]) -> ObjectId {
    let mut hasher = Sha1::new();
    hasher.update(object_header(kind, data.len() as u64));
    hasher.update(data);
    ObjectId::from_bytes(hasher.finalize().into())
}

/// A writer that hashes everything passing through it.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha1,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha1::new(),
            written: 0,
        }
    }

    /// feed bytes to the digest without forwarding them to the sink
    pub fn digest_only(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// write the object header into the digest only
    ///
    /// The header is part of the address but is not stored with the payload.
    pub fn write_header(&mut self, kind: ObjectKind, length: u64) {
        self.digest_only(&object_header(kind, length));
    }

    /// number of payload bytes forwarded to the sink so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// finalize the digest, returning the sink and the object id
    pub fn finish(self) -> (W, ObjectId) {
        let id = ObjectId::from_bytes(self.hasher.finalize().into());
        (self.inner, id)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_format() {
        assert_eq!(object_header(ObjectKind::Blob, 0), b"blob 0\0".to_vec());
        assert_eq!(object_header(ObjectKind::Commit, 1234), b"commit 1234\0".to_vec());
    }

    #[test]
    fn test_known_blob_ids() {
        // `git hash-object` of the empty blob and of "hello world\n"
        assert_eq!(
            id_for(ObjectKind::Blob, b"").to_hex(),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
        assert_eq!(
            id_for(ObjectKind::Blob, b"hello world\n").to_hex(),
            "3b18e512dba79e4c8300dd08aeb37f8e728b8dad"
        );
        // the empty tree
        assert_eq!(
            id_for(ObjectKind::Tree, b"").to_hex(),
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904"
        );
    }

    #[test]
    fn test_agrees_with_git2() {
        let data = b"some content that git should agree with";
        for kind in [ObjectKind::Blob, ObjectKind::Commit, ObjectKind::Tree, ObjectKind::Tag] {
            let expected = git2::Oid::hash_object(kind.to_git2(), data).unwrap();
            assert_eq!(id_for(kind, data), ObjectId::from(expected));
        }
    }

    #[test]
    fn test_writer_stores_payload_only() {
        let payload = b"payload bytes";
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_header(ObjectKind::Blob, payload.len() as u64);
        writer.write_all(payload).unwrap();
        assert_eq!(writer.written(), payload.len() as u64);

        let (stored, id) = writer.finish();
        assert_eq!(stored, payload.to_vec());
        assert_eq!(id, id_for(ObjectKind::Blob, payload));
    }

    #[test]
    fn test_chunked_writes_match_single_write() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_header(ObjectKind::Blob, payload.len() as u64);
        for chunk in payload.chunks(333) {
            writer.write_all(chunk).unwrap();
        }
        let (_, id) = writer.finish();
        assert_eq!(id, id_for(ObjectKind::Blob, &payload));
    }
}
