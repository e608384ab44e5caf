//! Framed AES-256-GCM stream codec
//!
//! Wire layout (offsets in bytes):
//!
//! ```text
//! 0   1   version = 0x01
//! 1   16  salt
//! 17  8   nonce prefix
//! 25  4   chunk size (big-endian u32)
//! 29  —   record 0, record 1, ...
//! record: [4 bytes BE length L][L bytes AES-GCM ciphertext incl. 16-byte tag]
//! ```
//!
//! The exact header bytes prefix every record's AAD, so editing the chunk
//! size, salt, or nonce prefix invalidates record 0. The record index is
//! bound into both the nonce and the AAD, so records cannot be reordered
//! or replayed across positions. End of input terminates the stream; there
//! is no trailer, and a header with zero records is a legal (empty) file.

use std::io::{self, Read, Write};

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use tracing::debug;

use veilfs_core::{StoreError, StoreResult};

use crate::keys::{derive_file_key, random_nonce_prefix, random_salt, MasterKey, UploadParams};
use crate::{
    DEFAULT_CHUNK_SIZE, FORMAT_VERSION, HEADER_SIZE, NONCE_PREFIX_SIZE, NONCE_SIZE, SALT_SIZE,
};

/// The 29-byte stream header. Its wire encoding doubles as the AAD prefix
/// for every record in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub salt: [u8; SALT_SIZE],
    pub nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    pub chunk_size: u32,
}

impl FileHeader {
    /// Header with fresh random salt and nonce prefix.
    pub fn fresh(chunk_size: u32) -> Self {
        Self {
            salt: random_salt(),
            nonce_prefix: random_nonce_prefix(),
            chunk_size,
        }
    }

    /// Header with deterministic parameters, shared by every chunk of one
    /// stateless upload.
    pub fn from_upload_params(params: UploadParams, chunk_size: u32) -> Self {
        Self {
            salt: params.salt,
            nonce_prefix: params.nonce_prefix,
            chunk_size,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut hdr = [0u8; HEADER_SIZE];
        hdr[0] = FORMAT_VERSION;
        hdr[1..17].copy_from_slice(&self.salt);
        hdr[17..25].copy_from_slice(&self.nonce_prefix);
        hdr[25..29].copy_from_slice(&self.chunk_size.to_be_bytes());
        hdr
    }

    pub fn parse(hdr: &[u8; HEADER_SIZE]) -> StoreResult<Self> {
        if hdr[0] != FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion(hdr[0]));
        }
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&hdr[1..17]);
        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        nonce_prefix.copy_from_slice(&hdr[17..25]);
        let chunk_size = u32::from_be_bytes([hdr[25], hdr[26], hdr[27], hdr[28]]);
        Ok(Self {
            salt,
            nonce_prefix,
            chunk_size,
        })
    }
}

fn cipher_for(master: &MasterKey, salt: &[u8; SALT_SIZE]) -> StoreResult<Aes256Gcm> {
    let key = derive_file_key(master, salt)?;
    Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| StoreError::Crypto("invalid key length"))
}

fn record_nonce(prefix: &[u8; NONCE_PREFIX_SIZE], index: u32) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..NONCE_PREFIX_SIZE].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_SIZE..].copy_from_slice(&index.to_be_bytes());
    nonce
}

fn record_aad(hdr: &[u8; HEADER_SIZE], index: u32) -> [u8; HEADER_SIZE + 4] {
    let mut aad = [0u8; HEADER_SIZE + 4];
    aad[..HEADER_SIZE].copy_from_slice(hdr);
    aad[HEADER_SIZE..].copy_from_slice(&index.to_be_bytes());
    aad
}

/// Seal one plaintext chunk into its framed record `[len BE][ciphertext]`.
fn seal_record(
    cipher: &Aes256Gcm,
    hdr: &[u8; HEADER_SIZE],
    prefix: &[u8; NONCE_PREFIX_SIZE],
    index: u32,
    plaintext: &[u8],
) -> StoreResult<Vec<u8>> {
    let nonce = record_nonce(prefix, index);
    let aad = record_aad(hdr, index);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| StoreError::Crypto("AEAD seal failed"))?;

    let mut record = Vec::with_capacity(4 + ciphertext.len());
    record.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
    record.extend_from_slice(&ciphertext);
    Ok(record)
}

/// Encrypt one chunk of a stateless upload as a standalone framed record.
///
/// The header must carry the deterministic upload parameters so the record
/// matches what [`encrypt`] would have produced at the same index.
pub fn encrypt_record(
    master: &MasterKey,
    header: &FileHeader,
    index: u32,
    plaintext: &[u8],
) -> StoreResult<Vec<u8>> {
    let cipher = cipher_for(master, &header.salt)?;
    seal_record(
        &cipher,
        &header.to_bytes(),
        &header.nonce_prefix,
        index,
        plaintext,
    )
}

/// Fill `buf` from the reader, stopping only at EOF. Returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read a 4-byte record length. `None` on clean EOF at a record boundary;
/// a partial prefix is a framing error.
fn read_len_prefix<R: Read>(reader: &mut R) -> StoreResult<Option<u32>> {
    let mut buf = [0u8; 4];
    let filled = read_full(reader, &mut buf)?;
    match filled {
        0 => Ok(None),
        4 => Ok(Some(u32::from_be_bytes(buf))),
        _ => Err(StoreError::CorruptFrame("truncated length prefix")),
    }
}

/// Encrypt `reader` into `writer` as a framed stream. A `chunk_size` of 0
/// selects the 1 MiB default. Returns the plaintext byte count.
///
/// All chunks except possibly the last are exactly `chunk_size` bytes;
/// empty input produces a header-only stream.
pub fn encrypt<R: Read, W: Write>(
    master: &MasterKey,
    reader: &mut R,
    writer: &mut W,
    chunk_size: u32,
) -> StoreResult<u64> {
    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };

    let header = FileHeader::fresh(chunk_size);
    let hdr = header.to_bytes();
    writer.write_all(&hdr)?;

    let cipher = cipher_for(master, &header.salt)?;

    let mut buf = vec![0u8; chunk_size as usize];
    let mut index: u32 = 0;
    let mut records: u64 = 0;
    let mut total: u64 = 0;
    loop {
        let n = read_full(reader, &mut buf)?;
        if n == 0 {
            break;
        }

        let record = seal_record(&cipher, &hdr, &header.nonce_prefix, index, &buf[..n])?;
        writer.write_all(&record)?;
        records += 1;
        total += n as u64;

        // A short chunk is the last one.
        if n < buf.len() {
            break;
        }
        index = index.checked_add(1).ok_or(StoreError::ChunkLimitExceeded)?;
    }

    debug!(records, bytes = total, "stream encrypted");
    Ok(total)
}

/// Decrypt a framed stream from `reader` into `writer`. Returns the
/// plaintext byte count.
pub fn decrypt<R: Read, W: Write>(
    master: &MasterKey,
    reader: &mut R,
    writer: &mut W,
) -> StoreResult<u64> {
    let mut hdr = [0u8; HEADER_SIZE];
    reader.read_exact(&mut hdr).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            StoreError::CorruptFrame("truncated header")
        } else {
            StoreError::Io(e)
        }
    })?;
    let header = FileHeader::parse(&hdr)?;

    let cipher = cipher_for(master, &header.salt)?;

    let mut index: u32 = 0;
    let mut records: u64 = 0;
    let mut total: u64 = 0;
    while let Some(ct_len) = read_len_prefix(reader)? {
        // Sized by what actually arrives, not by the (attacker-controlled)
        // length prefix.
        let mut ciphertext = Vec::new();
        let filled = reader
            .by_ref()
            .take(u64::from(ct_len))
            .read_to_end(&mut ciphertext)?;
        if filled < ct_len as usize {
            return Err(StoreError::CorruptFrame("truncated record body"));
        }

        let nonce = record_nonce(&header.nonce_prefix, index);
        let aad = record_aad(&hdr, index);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| StoreError::AuthFailed { index })?;

        writer.write_all(&plaintext)?;
        records += 1;
        total += plaintext.len() as u64;
        index = index.checked_add(1).ok_or(StoreError::ChunkLimitExceeded)?;
    }

    debug!(records, bytes = total, "stream decrypted");
    Ok(total)
}

/// Encrypt an in-memory buffer (manifests and other small documents).
pub fn encrypt_bytes(master: &MasterKey, plaintext: &[u8], chunk_size: u32) -> StoreResult<Vec<u8>> {
    let mut out = Vec::new();
    encrypt(master, &mut &plaintext[..], &mut out, chunk_size)?;
    Ok(out)
}

/// Decrypt an in-memory buffer.
pub fn decrypt_bytes(master: &MasterKey, data: &[u8]) -> StoreResult<Vec<u8>> {
    let mut out = Vec::new();
    decrypt(master, &mut &data[..], &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive_upload_params;
    use crate::{KEY_SIZE, TAG_SIZE};
    use proptest::prelude::*;

    fn test_master_key() -> MasterKey {
        MasterKey::from_bytes([0u8; KEY_SIZE])
    }

    fn encrypt_vec(plaintext: &[u8], chunk_size: u32) -> Vec<u8> {
        encrypt_bytes(&test_master_key(), plaintext, chunk_size).unwrap()
    }

    fn decrypt_vec(data: &[u8]) -> StoreResult<Vec<u8>> {
        decrypt_bytes(&test_master_key(), data)
    }

    #[test]
    fn roundtrip_small() {
        let data = b"hello, encrypted world!";
        let sealed = encrypt_vec(data, 4096);
        assert_eq!(decrypt_vec(&sealed).unwrap(), data);
    }

    #[test]
    fn roundtrip_empty_is_header_only() {
        let sealed = encrypt_vec(b"", 4096);
        assert_eq!(sealed.len(), HEADER_SIZE, "empty input yields zero records");
        assert_eq!(decrypt_vec(&sealed).unwrap(), b"");
    }

    #[test]
    fn roundtrip_multi_record() {
        let data: Vec<u8> = (0u8..=255).cycle().take(10_000).collect();
        let sealed = encrypt_vec(&data, 4096);
        assert_eq!(decrypt_vec(&sealed).unwrap(), data);
    }

    #[test]
    fn roundtrip_exact_chunk_multiple() {
        let data = vec![0xA5u8; 8192];
        let sealed = encrypt_vec(&data, 4096);
        // 2 full records, nothing more
        assert_eq!(sealed.len(), HEADER_SIZE + 2 * (4 + 4096 + TAG_SIZE));
        assert_eq!(decrypt_vec(&sealed).unwrap(), data);
    }

    #[test]
    fn one_byte_past_default_chunk() {
        let data: Vec<u8> = (0..(1u32 << 20) + 1).map(|i| i as u8).collect();
        let sealed = encrypt_vec(&data, 0);

        // header + [len | 1 MiB ct | tag] + [len | 1 byte ct | tag]
        let expected = HEADER_SIZE as u64
            + (4 + (1u64 << 20) + TAG_SIZE as u64)
            + (4 + 1 + TAG_SIZE as u64);
        assert_eq!(sealed.len() as u64, expected);
        assert_eq!(sealed.len(), 1_048_646);

        assert_eq!(decrypt_vec(&sealed).unwrap(), data);
    }

    #[test]
    fn header_only_file_decrypts_to_nothing() {
        let sealed = encrypt_vec(b"hello", 4096);
        // Keep only the header, as if the record was lost mid-write.
        let truncated = &sealed[..HEADER_SIZE];
        assert_eq!(decrypt_vec(truncated).unwrap(), b"");
    }

    #[test]
    fn wrong_key_fails_on_first_record() {
        let sealed = encrypt_vec(b"secret data", 4096);
        let other = MasterKey::from_bytes([1u8; KEY_SIZE]);
        match decrypt_bytes(&other, &sealed) {
            Err(StoreError::AuthFailed { index: 0 }) => {}
            other => panic!("expected AuthFailed(0), got {other:?}"),
        }
    }

    #[test]
    fn bad_version_byte_rejected() {
        let mut sealed = encrypt_vec(b"hi", 4096);
        sealed[0] = 2;
        match decrypt_vec(&sealed) {
            Err(StoreError::UnsupportedVersion(2)) => {}
            other => panic!("expected UnsupportedVersion(2), got {other:?}"),
        }
    }

    #[test]
    fn tampered_salt_fails_auth() {
        let mut sealed = encrypt_vec(b"hello", 4096);
        sealed[1] ^= 0xFF;
        match decrypt_vec(&sealed) {
            Err(StoreError::AuthFailed { index: 0 }) => {}
            other => panic!("expected AuthFailed(0), got {other:?}"),
        }
    }

    #[test]
    fn tampered_nonce_prefix_fails_auth() {
        let mut sealed = encrypt_vec(b"hello", 4096);
        sealed[17] ^= 0x01;
        match decrypt_vec(&sealed) {
            Err(StoreError::AuthFailed { index: 0 }) => {}
            other => panic!("expected AuthFailed(0), got {other:?}"),
        }
    }

    #[test]
    fn tampered_chunk_size_fails_auth() {
        // The chunk size is advisory for framing but bound into the AAD.
        let mut sealed = encrypt_vec(b"hello", 4096);
        sealed[25] ^= 0x01;
        match decrypt_vec(&sealed) {
            Err(StoreError::AuthFailed { index: 0 }) => {}
            other => panic!("expected AuthFailed(0), got {other:?}"),
        }
    }

    #[test]
    fn tampered_ciphertext_reports_record_index() {
        let data: Vec<u8> = (0u8..=255).cycle().take(10_000).collect();
        let mut sealed = encrypt_vec(&data, 4096);

        // Flip a byte inside record 1's body.
        let record_1_body = HEADER_SIZE + 4 + 4096 + TAG_SIZE + 4 + 10;
        sealed[record_1_body] ^= 0xFF;

        match decrypt_vec(&sealed) {
            Err(StoreError::AuthFailed { index: 1 }) => {}
            other => panic!("expected AuthFailed(1), got {other:?}"),
        }
    }

    #[test]
    fn swapped_records_fail_auth() {
        let data = vec![0x11u8; 8192];
        let sealed = encrypt_vec(&data, 4096);

        let record_len = 4 + 4096 + TAG_SIZE;
        let (r0, r1) = (
            sealed[HEADER_SIZE..HEADER_SIZE + record_len].to_vec(),
            sealed[HEADER_SIZE + record_len..HEADER_SIZE + 2 * record_len].to_vec(),
        );
        let mut swapped = sealed[..HEADER_SIZE].to_vec();
        swapped.extend_from_slice(&r1);
        swapped.extend_from_slice(&r0);

        match decrypt_vec(&swapped) {
            Err(StoreError::AuthFailed { index: 0 }) => {}
            other => panic!("expected AuthFailed(0), got {other:?}"),
        }
    }

    #[test]
    fn truncated_length_prefix_is_corrupt_frame() {
        let sealed = encrypt_vec(b"hello", 4096);
        let truncated = &sealed[..HEADER_SIZE + 2];
        match decrypt_vec(truncated) {
            Err(StoreError::CorruptFrame(_)) => {}
            other => panic!("expected CorruptFrame, got {other:?}"),
        }
    }

    #[test]
    fn truncated_record_body_is_corrupt_frame() {
        let sealed = encrypt_vec(b"hello", 4096);
        let truncated = &sealed[..sealed.len() - 3];
        match decrypt_vec(truncated) {
            Err(StoreError::CorruptFrame(_)) => {}
            other => panic!("expected CorruptFrame, got {other:?}"),
        }
    }

    #[test]
    fn truncated_header_is_corrupt_frame() {
        let sealed = encrypt_vec(b"hello", 4096);
        match decrypt_vec(&sealed[..HEADER_SIZE - 5]) {
            Err(StoreError::CorruptFrame(_)) => {}
            other => panic!("expected CorruptFrame, got {other:?}"),
        }
    }

    #[test]
    fn standalone_record_matches_stream_framing() {
        let master = test_master_key();
        let params = derive_upload_params(&master, "fid-1").unwrap();
        let header = FileHeader::from_upload_params(params, 4096);

        // Records are deterministic per (master, file id, index, body).
        let r1 = encrypt_record(&master, &header, 3, b"0123").unwrap();
        let r2 = encrypt_record(&master, &header, 3, b"0123").unwrap();
        assert_eq!(r1, r2);

        // Assembling header + records in order yields a decryptable stream.
        let mut assembled = header.to_bytes().to_vec();
        assembled.extend(encrypt_record(&master, &header, 0, b"aaaa").unwrap());
        assembled.extend(encrypt_record(&master, &header, 1, b"bb").unwrap());
        assert_eq!(decrypt_bytes(&master, &assembled).unwrap(), b"aaaabb");
    }

    #[test]
    fn record_at_wrong_index_fails_auth() {
        let master = test_master_key();
        let params = derive_upload_params(&master, "fid-2").unwrap();
        let header = FileHeader::from_upload_params(params, 4096);

        let mut assembled = header.to_bytes().to_vec();
        assembled.extend(encrypt_record(&master, &header, 1, b"aaaa").unwrap());

        match decrypt_bytes(&master, &assembled) {
            Err(StoreError::AuthFailed { index: 0 }) => {}
            other => panic!("expected AuthFailed(0), got {other:?}"),
        }
    }

    #[test]
    fn header_wire_roundtrip() {
        let header = FileHeader::fresh(65536);
        let bytes = header.to_bytes();
        assert_eq!(bytes[0], FORMAT_VERSION);
        assert_eq!(FileHeader::parse(&bytes).unwrap(), header);
    }

    proptest! {
        #[test]
        fn roundtrip_any_bytes(
            data in proptest::collection::vec(any::<u8>(), 0..=32768),
            chunk_choice in 0usize..4,
        ) {
            let chunk_size = match chunk_choice {
                0 => 1,
                1 => 7,
                2 => 4096,
                _ => data.len() as u32 + 1,
            };
            let sealed = encrypt_vec(&data, chunk_size);
            prop_assert_eq!(decrypt_vec(&sealed).unwrap(), data);
        }

        #[test]
        fn bit_flip_never_passes(
            data in proptest::collection::vec(any::<u8>(), 1..=4096),
            flip_seed in any::<u32>(),
        ) {
            let mut sealed = encrypt_vec(&data, 1024);
            // Skip byte 0: changing the version is rejected before any AEAD runs.
            let pos = 1 + (flip_seed as usize % (sealed.len() - 1));
            sealed[pos] ^= 1 << (flip_seed % 8);

            match decrypt_vec(&sealed) {
                Ok(plain) => prop_assert!(false, "tampered stream decrypted to {} bytes", plain.len()),
                Err(StoreError::AuthFailed { .. })
                | Err(StoreError::CorruptFrame(_))
                | Err(StoreError::UnsupportedVersion(_)) => {}
                Err(e) => prop_assert!(false, "unexpected error kind: {e:?}"),
            }
        }
    }
}
