//! Streaming content hash with chunked digests of the file start and end.
//!
//! Chunk `k` covers `MIN_CHUNK_SIZE << k` bytes for `k` in `0..=MAX_CHUNK_EXPONENT`
//! and exists only while `2 * chunk_len <= size`, so front and end chunks never
//! overlap. Files smaller than `2 * MIN_CHUNK_SIZE` get the truncated full digest
//! as their single front and end chunk.

use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::trace;

use crate::context::CancelToken;
use crate::error::{Error, Result};

pub const MIN_CHUNK_SIZE: u64 = 1024;
pub const MAX_CHUNK_EXPONENT: u32 = 10;
/// Bytes read by the leading-chunk pre-check, and by truncated hashing.
pub const LEADING_BYTES: u64 = MIN_CHUNK_SIZE << MAX_CHUNK_EXPONENT;
const CHUNK_HEX_LEN: usize = 12;
const BUFFER_SIZE: usize = 512 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub hash: String,
    pub begin: Vec<String>,
    pub end: Vec<String>,
}

fn chunk_lengths(size: u64) -> impl Iterator<Item = u64> {
    (0..=MAX_CHUNK_EXPONENT)
        .map(|k| MIN_CHUNK_SIZE << k)
        .take_while(move |len| len * 2 <= size)
}

/// Leading hex characters of the digest of everything fed to `hasher` so far.
fn short_hex(hasher: &Sha1) -> String {
    let mut digest = hex::encode(hasher.clone().finalize());
    digest.truncate(CHUNK_HEX_LEN);
    digest
}

/// Incremental state, independent of how the input is split into pieces.
pub struct ChecksumBuilder {
    size: u64,
    target: u64,
    truncated: bool,
    consumed: u64,
    full: Sha1,
    front_lengths: Vec<u64>,
    begin: Vec<String>,
    /// (start offset, hasher) per end chunk, smallest chunk first.
    end: Vec<(u64, Sha1)>,
}

impl ChecksumBuilder {
    pub fn new(size: u64, truncate_to_first_mb: bool) -> Self {
        let front_lengths: Vec<u64> = chunk_lengths(size).collect();
        let end = if truncate_to_first_mb {
            Vec::new()
        } else {
            front_lengths
                .iter()
                .map(|len| (size - len, Sha1::new()))
                .collect()
        };
        let target = if truncate_to_first_mb {
            size.min(LEADING_BYTES)
        } else {
            size
        };
        Self {
            size,
            target,
            truncated: truncate_to_first_mb,
            consumed: 0,
            full: Sha1::new(),
            front_lengths,
            begin: Vec::new(),
            end,
        }
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Number of bytes that must be fed before [`finish`](Self::finish).
    pub fn target(&self) -> u64 {
        self.target
    }

    /// Bytes needed before the front chunk list is final.
    pub fn leading_target(&self) -> u64 {
        if self.size < 2 * MIN_CHUNK_SIZE {
            self.size
        } else {
            self.front_lengths.last().copied().unwrap_or(0)
        }
    }

    /// Feeds the next piece. Input past the target is ignored.
    pub fn update(&mut self, mut data: &[u8]) {
        let remaining = self.target.saturating_sub(self.consumed);
        if (data.len() as u64) > remaining {
            data = &data[..remaining as usize];
        }
        let start = self.consumed;
        let stop = start + data.len() as u64;

        for (chunk_start, hasher) in self.end.iter_mut() {
            if *chunk_start < stop {
                let from = chunk_start.saturating_sub(start) as usize;
                hasher.update(&data[from..]);
            }
        }

        while !data.is_empty() {
            let next_boundary = self.front_lengths.get(self.begin.len()).copied();
            match next_boundary {
                Some(boundary) if boundary <= self.consumed + data.len() as u64 => {
                    let split = (boundary - self.consumed) as usize;
                    self.full.update(&data[..split]);
                    self.consumed = boundary;
                    self.begin.push(short_hex(&self.full));
                    data = &data[split..];
                }
                _ => {
                    self.full.update(data);
                    self.consumed += data.len() as u64;
                    data = &[];
                }
            }
        }
    }

    /// Front chunk list, once [`leading_target`](Self::leading_target) bytes were fed.
    pub fn leading_chunks(&self) -> Vec<String> {
        if self.size < 2 * MIN_CHUNK_SIZE {
            vec![short_hex(&self.full)]
        } else {
            self.begin.clone()
        }
    }

    pub fn finish(self) -> Checksum {
        if self.size < 2 * MIN_CHUNK_SIZE {
            let chunk = short_hex(&self.full);
            let end = if self.truncated {
                Vec::new()
            } else {
                vec![chunk.clone()]
            };
            return Checksum {
                hash: hex::encode(self.full.finalize()),
                begin: vec![chunk],
                end,
            };
        }
        Checksum {
            hash: hex::encode(self.full.finalize()),
            begin: self.begin,
            end: self.end.iter().map(|(_, hasher)| short_hex(hasher)).collect(),
        }
    }
}

/// Drives a [`ChecksumBuilder`] from a byte stream of known length.
pub struct ChecksumReader<'a, R: Read> {
    reader: R,
    path: PathBuf,
    builder: ChecksumBuilder,
    buffer: Vec<u8>,
    cancel: Option<CancelToken>,
    capture: Option<(&'a mut Vec<u8>, usize)>,
}

impl<'a, R: Read> ChecksumReader<'a, R> {
    pub fn new(reader: R, path: impl Into<PathBuf>, size: u64, truncate_to_first_mb: bool) -> Self {
        Self {
            reader,
            path: path.into(),
            builder: ChecksumBuilder::new(size, truncate_to_first_mb),
            buffer: vec![0u8; BUFFER_SIZE],
            cancel: None,
            capture: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Copies every byte read into `buffer`, unless the stream exceeds `limit`
    /// bytes, in which case the buffer is left empty.
    pub fn capture_into(mut self, buffer: &'a mut Vec<u8>, limit: usize) -> Self {
        buffer.clear();
        self.capture = Some((buffer, limit));
        self
    }

    fn read_until(&mut self, goal: u64) -> Result<()> {
        while self.builder.consumed() < goal {
            if let Some(cancel) = &self.cancel {
                cancel.check()?;
            }
            let want = ((goal - self.builder.consumed()) as usize).min(self.buffer.len());
            let n = match self.reader.read(&mut self.buffer[..want]) {
                Ok(0) => {
                    return Err(Error::SizeChanged {
                        path: self.path.clone(),
                        expected: self.builder.size,
                        actual: self.builder.consumed(),
                    })
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::read(&self.path, e)),
            };
            self.builder.update(&self.buffer[..n]);
            if let Some((captured, limit)) = self.capture.as_mut() {
                if captured.len() + n <= *limit {
                    captured.extend_from_slice(&self.buffer[..n]);
                } else {
                    captured.clear();
                    self.capture = None;
                }
            }
        }
        Ok(())
    }

    /// Reads only as far as the front chunk list requires (at most 1 MiB).
    pub fn leading_chunks(&mut self) -> Result<Vec<String>> {
        let goal = self.builder.leading_target();
        self.read_until(goal)?;
        trace!("Leading chunks of {} read", self.path.display());
        Ok(self.builder.leading_chunks())
    }

    /// Continues the stream to its end and returns the complete checksum.
    pub fn finish(mut self) -> Result<Checksum> {
        let goal = self.builder.target();
        self.read_until(goal)?;
        if !self.builder.truncated {
            let mut probe = [0u8; 1];
            loop {
                match self.reader.read(&mut probe) {
                    Ok(0) => break,
                    Ok(n) => {
                        return Err(Error::SizeChanged {
                            path: self.path.clone(),
                            expected: self.builder.size,
                            actual: self.builder.size + n as u64,
                        })
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(Error::read(&self.path, e)),
                }
            }
        }
        Ok(self.builder.finish())
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| Error::read(path, e))
}

pub fn checksum_file(
    path: &Path,
    size: u64,
    truncate_to_first_mb: bool,
    cancel: &CancelToken,
) -> Result<Checksum> {
    ChecksumReader::new(open(path)?, path, size, truncate_to_first_mb)
        .with_cancel(cancel.clone())
        .finish()
}

pub fn leading_chunks_of_file(path: &Path, size: u64, cancel: &CancelToken) -> Result<Vec<String>> {
    ChecksumReader::new(open(path)?, path, size, false)
        .with_cancel(cancel.clone())
        .leading_chunks()
}

pub fn join_chunks(chunks: &[String]) -> String {
    chunks.join(",")
}

pub fn split_chunks(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        Vec::new()
    } else {
        joined.split(',').map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Returns at most `step` bytes per read call.
    struct Dribble<R> {
        inner: R,
        step: usize,
    }

    impl<R: Read> Read for Dribble<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.step);
            self.inner.read(&mut buf[..n])
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn sha1_hex(data: &[u8]) -> String {
        hex::encode(Sha1::digest(data))
    }

    fn chunk_hex(data: &[u8]) -> String {
        sha1_hex(data)[..CHUNK_HEX_LEN].to_string()
    }

    fn one_pass(data: &[u8]) -> Checksum {
        let mut builder = ChecksumBuilder::new(data.len() as u64, false);
        builder.update(data);
        builder.finish()
    }

    #[test]
    fn test_full_hash_is_sha1() {
        let data = sample(10_000);
        let checksum = one_pass(&data);
        assert_eq!(checksum.hash.len(), 40);
        assert_eq!(checksum.hash, sha1_hex(&data));
        assert_eq!(
            one_pass(b"abc").hash,
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_chunk_counts_stop_at_half_size() {
        // 2 * 1024 <= 5000, 2 * 2048 <= 5000, 2 * 4096 > 5000
        let data = sample(5000);
        let checksum = one_pass(&data);
        assert_eq!(checksum.begin.len(), 2);
        assert_eq!(checksum.end.len(), 2);
        assert_eq!(checksum.begin[0], chunk_hex(&data[..1024]));
        assert_eq!(checksum.begin[1], chunk_hex(&data[..2048]));
        assert_eq!(checksum.end[0], chunk_hex(&data[5000 - 1024..]));
        assert_eq!(checksum.end[1], chunk_hex(&data[5000 - 2048..]));
    }

    #[test]
    fn test_chunks_capped_at_one_mib() {
        let data = sample(3 * 1024 * 1024);
        let checksum = one_pass(&data);
        assert_eq!(checksum.begin.len(), (MAX_CHUNK_EXPONENT + 1) as usize);
        assert_eq!(checksum.end.len(), (MAX_CHUNK_EXPONENT + 1) as usize);
    }

    #[test]
    fn test_small_file_single_chunk() {
        let data = sample(2047);
        let checksum = one_pass(&data);
        let expected = chunk_hex(&data);
        assert_eq!(checksum.begin, vec![expected.clone()]);
        assert_eq!(checksum.end, vec![expected]);
    }

    #[test]
    fn test_split_points_do_not_change_result() {
        let data = sample(70_001);
        let expected = one_pass(&data);
        for split in [0usize, 1, 1023, 1024, 1025, 4096, 35_000, 70_000, 70_001] {
            let mut builder = ChecksumBuilder::new(data.len() as u64, false);
            builder.update(&data[..split]);
            builder.update(&data[split..]);
            assert_eq!(builder.finish(), expected, "split at {}", split);
        }
    }

    #[test]
    fn test_leading_then_continue_equals_one_pass() {
        for len in [0usize, 100, 2048, 9_999, 1_500_000, 2_200_000] {
            let data = sample(len);
            let expected = one_pass(&data);
            let reader = Dribble {
                inner: Cursor::new(data.clone()),
                step: 7919,
            };
            let mut checksum = ChecksumReader::new(reader, "mem", len as u64, false);
            let leading = checksum.leading_chunks().unwrap();
            assert_eq!(leading, expected.begin, "leading chunks for len {}", len);
            assert_eq!(checksum.finish().unwrap(), expected, "len {}", len);
        }
    }

    #[test]
    fn test_truncated_mode_hashes_first_mib_only() {
        let data = sample(1_200_000);
        let reader = ChecksumReader::new(Cursor::new(data.clone()), "mem", data.len() as u64, true);
        let checksum = reader.finish().unwrap();
        assert_eq!(checksum.hash, sha1_hex(&data[..LEADING_BYTES as usize]));
        assert!(checksum.end.is_empty());
    }

    #[test]
    fn test_shrunk_stream_reports_size_changed() {
        let data = sample(500);
        let reader = ChecksumReader::new(Cursor::new(data), "mem", 600, false);
        match reader.finish() {
            Err(Error::SizeChanged { expected, actual, .. }) => {
                assert_eq!(expected, 600);
                assert_eq!(actual, 500);
            }
            other => panic!("expected SizeChanged, got {:?}", other),
        }
    }

    #[test]
    fn test_grown_stream_reports_size_changed() {
        let data = sample(700);
        let reader = ChecksumReader::new(Cursor::new(data), "mem", 600, false);
        assert!(matches!(reader.finish(), Err(Error::SizeChanged { .. })));
    }

    #[test]
    fn test_cancelled_read() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let reader = ChecksumReader::new(Cursor::new(sample(10)), "mem", 10, false).with_cancel(cancel);
        assert!(matches!(reader.finish(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_capture_respects_limit() {
        let data = sample(3000);
        let mut small = Vec::new();
        ChecksumReader::new(Cursor::new(data.clone()), "mem", 3000, false)
            .capture_into(&mut small, 1000)
            .finish()
            .unwrap();
        assert!(small.is_empty());

        let mut large = Vec::new();
        ChecksumReader::new(Cursor::new(data.clone()), "mem", 3000, false)
            .capture_into(&mut large, 10_000)
            .finish()
            .unwrap();
        assert_eq!(large, data);
    }

    #[test]
    fn test_join_and_split_chunks() {
        let chunks = vec!["aaa".to_string(), "bbb".to_string()];
        assert_eq!(split_chunks(&join_chunks(&chunks)), chunks);
        assert!(split_chunks("").is_empty());
    }
}
