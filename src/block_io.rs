//! Block-sized (512-byte) framing over a file handle, honoring transfer mode.
//!
//! Mirrors `apts.file_rw`: a reader that hands out successive blocks ready to
//! go straight into `Data` packets, and a writer that takes `Data` payloads
//! straight off the wire. Both close their handle as soon as a short block
//! is seen, and raise on any further use afterward.

use crate::packet::MAX_DATA_SIZE;
use std::fs::File;
use std::io::{self, Read, Write};

/// Error raised by a reader/writer used after it has already closed, or by
/// an underlying OS-level read/write failure.
#[derive(Debug)]
pub enum BlockIoError {
    /// `next_block`/`write_block` called after the handle already closed.
    Closed,
    /// The underlying file I/O failed.
    Io(io::Error),
}

impl From<io::Error> for BlockIoError {
    fn from(err: io::Error) -> Self {
        BlockIoError::Io(err)
    }
}

impl std::fmt::Display for BlockIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            BlockIoError::Closed => write!(f, "I/O attempted on a closed transfer handle"),
            BlockIoError::Io(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for BlockIoError {}

pub type Result<T> = std::result::Result<T, BlockIoError>;

/// Whether file content is transcoded through netascii, or passed verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Netascii,
    Octet,
}

impl From<crate::packet::TransferMode> for Mode {
    fn from(m: crate::packet::TransferMode) -> Self {
        match m {
            crate::packet::TransferMode::Netascii => Mode::Netascii,
            crate::packet::TransferMode::Octet => Mode::Octet,
        }
    }
}

/// Yields successive `<=512`-byte blocks of a file, ready to ship as `Data`
/// payloads.
pub struct BlockReader {
    file: Option<File>,
    mode: Mode,
    /// Bytes already transcoded (netascii) or read (octet) but not yet
    /// handed out via `next_block`.
    carry: Vec<u8>,
    /// Raw bytes read from the file but not yet transcoded, because they end
    /// in a strict prefix of `host_newline` that might still complete into a
    /// full match once more bytes are read (netascii only).
    pending_raw: Vec<u8>,
    host_newline: Vec<u8>,
}

impl BlockReader {
    /// Opens `file` for block-wise reading in the given transfer `mode`.
    pub fn new(file: File, mode: Mode) -> Self {
        Self::with_newline(file, mode, crate::netascii::platform_newline_owned())
    }

    /// Like [`BlockReader::new`], but with an explicit host newline (mainly
    /// useful for tests).
    pub fn with_newline(file: File, mode: Mode, host_newline: Vec<u8>) -> Self {
        Self {
            file: Some(file),
            mode,
            carry: Vec::new(),
            pending_raw: Vec::new(),
            host_newline,
        }
    }

    fn is_closed(&self) -> bool {
        self.file.is_none() && self.carry.is_empty()
    }

    /// Returns the next block of at most 512 bytes. A block shorter than 512
    /// bytes (possibly empty) is the last block of the transfer; the reader
    /// closes its handle before returning it. Calling this again afterward
    /// is an error.
    pub fn next_block(&mut self) -> Result<Vec<u8>> {
        if self.is_closed() {
            return Err(BlockIoError::Closed);
        }

        match self.mode {
            Mode::Octet => self.next_block_octet(),
            Mode::Netascii => self.next_block_netascii(),
        }
    }

    fn next_block_octet(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; MAX_DATA_SIZE];
        let n = read_fill(self.file.as_mut().unwrap(), &mut buf)?;
        buf.truncate(n);
        if n < MAX_DATA_SIZE {
            self.file = None;
        }
        Ok(buf)
    }

    fn next_block_netascii(&mut self) -> Result<Vec<u8>> {
        while self.carry.len() < MAX_DATA_SIZE && self.file.is_some() {
            let mut chunk = vec![0u8; MAX_DATA_SIZE];
            let n = read_fill(self.file.as_mut().unwrap(), &mut chunk)?;
            chunk.truncate(n);
            self.pending_raw.extend(chunk);

            if n == 0 {
                // Nothing left to complete a straddling newline match with;
                // transcode whatever remains and stop.
                let raw = std::mem::take(&mut self.pending_raw);
                self.carry
                    .extend(crate::netascii::encode(&raw, &self.host_newline));
                self.file = None;
                break;
            }

            // A multi-byte host newline (e.g. CRLF) can straddle the boundary
            // between this raw read and the next one. Hold back whatever
            // trailing bytes still look like the start of such a match, so it
            // is never split and transcoded as two independent pieces.
            let hold = newline_prefix_held_back(&self.pending_raw, &self.host_newline);
            let encode_len = self.pending_raw.len() - hold;
            let ready: Vec<u8> = self.pending_raw.drain(..encode_len).collect();
            self.carry
                .extend(crate::netascii::encode(&ready, &self.host_newline));
        }

        let take = self.carry.len().min(MAX_DATA_SIZE);
        let block: Vec<u8> = self.carry.drain(..take).collect();
        if block.len() < MAX_DATA_SIZE {
            self.file = None;
        }
        Ok(block)
    }
}

/// Length of the longest suffix of `buf` that is also a strict (non-empty,
/// non-full) prefix of `host_newline`. That suffix must be withheld from
/// encoding until more bytes arrive, since it might still grow into a full
/// host-newline match.
fn newline_prefix_held_back(buf: &[u8], host_newline: &[u8]) -> usize {
    for k in (1..host_newline.len()).rev() {
        if k <= buf.len() && buf[buf.len() - k..] == host_newline[..k] {
            return k;
        }
    }
    0
}

/// Reads into `buf` until it is full or EOF, returning the number of bytes
/// actually read (mirrors the short-read tolerance `Read::read` alone
/// doesn't give you).
fn read_fill(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

/// Accepts successive `Data` payloads and writes them to a file.
pub struct BlockWriter {
    file: Option<File>,
    mode: Mode,
    host_newline: Vec<u8>,
}

impl BlockWriter {
    /// Opens `file` for block-wise writing in the given transfer `mode`.
    pub fn new(file: File, mode: Mode) -> Self {
        Self::with_newline(file, mode, crate::netascii::platform_newline_owned())
    }

    /// Like [`BlockWriter::new`], but with an explicit host newline (mainly
    /// useful for tests).
    pub fn with_newline(file: File, mode: Mode, host_newline: Vec<u8>) -> Self {
        Self {
            file: Some(file),
            mode,
            host_newline,
        }
    }

    /// Writes one block of at most 512 bytes. A block shorter than 512 bytes
    /// (possibly empty) is the last of the transfer; the writer closes its
    /// handle after writing it. Calling this again afterward is an error.
    pub fn write_block(&mut self, data: &[u8]) -> Result<()> {
        let file = self.file.as_mut().ok_or(BlockIoError::Closed)?;
        match self.mode {
            Mode::Octet => file.write_all(data)?,
            Mode::Netascii => file.write_all(&crate::netascii::decode(data, &self.host_newline))?,
        }
        if data.len() < MAX_DATA_SIZE {
            self.file = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::{Seek, SeekFrom};

    fn temp_file_with(contents: &[u8]) -> File {
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(contents).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        f
    }

    #[test]
    fn octet_reader_totality_single_short_block() {
        let data = b"hello world";
        let mut reader = BlockReader::new(temp_file_with(data), Mode::Octet);
        let block = reader.next_block().unwrap();
        assert_eq!(block, data);
        assert!(block.len() < MAX_DATA_SIZE);
        assert_matches!(reader.next_block(), Err(BlockIoError::Closed));
    }

    #[test]
    fn octet_reader_exact_boundary_then_empty_final() {
        let data = vec![7u8; 512];
        let mut reader = BlockReader::new(temp_file_with(&data), Mode::Octet);
        let first = reader.next_block().unwrap();
        assert_eq!(first.len(), 512);
        let second = reader.next_block().unwrap();
        assert!(second.is_empty());
        assert_matches!(reader.next_block(), Err(BlockIoError::Closed));
    }

    #[test]
    fn octet_writer_short_block_closes() {
        let f = tempfile::tempfile().unwrap();
        let mut writer = BlockWriter::new(f, Mode::Octet);
        writer.write_block(b"hi").unwrap();
        assert_matches!(writer.write_block(b"more"), Err(BlockIoError::Closed));
    }

    #[test]
    fn netascii_reader_matches_encode_of_whole_file() {
        let data = b"line one\nline two\r\nline three\rend";
        let nl: Vec<u8> = b"\n".to_vec();
        let mut reader =
            BlockReader::with_newline(temp_file_with(data), Mode::Netascii, nl.clone());

        let mut collected = Vec::new();
        loop {
            let block = reader.next_block().unwrap();
            let is_last = block.len() < MAX_DATA_SIZE;
            collected.extend(block);
            if is_last {
                break;
            }
        }
        assert_matches!(reader.next_block(), Err(BlockIoError::Closed));
        assert_eq!(collected, crate::netascii::encode(data, &nl));
    }

    #[test]
    fn netascii_reader_handles_crlf_straddling_chunk_boundary() {
        // The raw CR lands at byte index 511, its LF partner at 512 — exactly
        // on the reader's 512-byte raw-read boundary.
        let mut data = vec![b'x'; 511];
        data.extend_from_slice(b"\r\n");
        data.extend_from_slice(b"more text after the break");
        let nl: Vec<u8> = b"\r\n".to_vec();
        let mut reader =
            BlockReader::with_newline(temp_file_with(&data), Mode::Netascii, nl.clone());

        let mut collected = Vec::new();
        loop {
            let block = reader.next_block().unwrap();
            let is_last = block.len() < MAX_DATA_SIZE;
            collected.extend(block);
            if is_last {
                break;
            }
        }
        assert_matches!(reader.next_block(), Err(BlockIoError::Closed));
        assert_eq!(collected, crate::netascii::encode(&data, &nl));
    }

    #[test]
    fn netascii_writer_reconstructs_reader_stream() {
        let data = b"alpha\nbeta\r\ngamma\rdelta\n".repeat(40); // > 512 bytes
        let nl: Vec<u8> = b"\n".to_vec();
        let mut reader =
            BlockReader::with_newline(temp_file_with(&data), Mode::Netascii, nl.clone());

        let out_file = tempfile::tempfile().unwrap();
        let mut writer = BlockWriter::with_newline(out_file.try_clone().unwrap(), Mode::Netascii, nl);

        loop {
            let block = reader.next_block().unwrap();
            let is_last = block.len() < MAX_DATA_SIZE;
            writer.write_block(&block).unwrap();
            if is_last {
                break;
            }
        }

        let mut out_file = out_file;
        out_file.seek(SeekFrom::Start(0)).unwrap();
        let mut roundtripped = Vec::new();
        out_file.read_to_end(&mut roundtripped).unwrap();
        assert_eq!(roundtripped, data);
    }

    #[test]
    fn octet_writer_inverse_of_reader() {
        let data = vec![42u8; 1200];
        let mut reader = BlockReader::new(temp_file_with(&data), Mode::Octet);
        let out_file = tempfile::tempfile().unwrap();
        let mut writer = BlockWriter::new(out_file.try_clone().unwrap(), Mode::Octet);

        loop {
            let block = reader.next_block().unwrap();
            let is_last = block.len() < MAX_DATA_SIZE;
            writer.write_block(&block).unwrap();
            if is_last {
                break;
            }
        }

        let mut out_file = out_file;
        out_file.seek(SeekFrom::Start(0)).unwrap();
        let mut roundtripped = Vec::new();
        out_file.read_to_end(&mut roundtripped).unwrap();
        assert_eq!(roundtripped, data);
    }
}
