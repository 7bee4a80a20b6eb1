//! The per-transfer protocol engine.
//!
//! A [`Session`] owns one UDP socket (its local port is the server-side TID)
//! and drives the RRQ/WRQ lock-step state machine to completion on its own
//! thread, reading and replying one datagram at a time until the transfer
//! finishes, fails, or its retransmission budget runs out.

use crate::block_io::{self, BlockReader, BlockWriter};
use crate::packet::{ErrorCode, Packet, MAX_PACKET_SIZE};
use log::{debug, error, info, warn};
use std::fs::{self, OpenOptions};
use std::net::{SocketAddr, UdpSocket};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// A transfer's active file handle, once its direction is known.
enum FileIo {
    Reading(BlockReader),
    Writing(BlockWriter),
}

/// Drives one RRQ or WRQ transfer to completion.
pub struct Session {
    socket: UdpSocket,
    peer: SocketAddr,
    root: PathBuf,
    writable: bool,
    schedule: Vec<Duration>,
}

impl Session {
    /// Binds a fresh ephemeral socket (the session's TID) and prepares to
    /// serve `peer` out of `root`.
    pub fn new(
        peer: SocketAddr,
        root: PathBuf,
        writable: bool,
        schedule: Vec<Duration>,
    ) -> std::io::Result<Self> {
        let bind_addr: SocketAddr = if peer.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind_addr)?;
        Ok(Session {
            socket,
            peer,
            root,
            writable,
            schedule,
        })
    }

    /// Runs the session to completion on the calling thread. `initial_bytes`
    /// is the datagram that caused the listener to spawn this session.
    pub fn run(mut self, initial_bytes: Vec<u8>) {
        let tid = self.socket.local_addr().map(|a| a.port()).unwrap_or(0);
        info!("session opened for {} on TID {}", self.peer, tid);

        let mut block_number: u16 = 0;
        let mut file_io: Option<FileIo> = None;
        let mut last_sent: Option<Packet> = None;
        let mut retransmissions: usize = 0;
        let mut input = initial_bytes;

        loop {
            let outcome = match Packet::parse(&input) {
                Ok(packet) => self.handle_packet(
                    packet,
                    &mut block_number,
                    &mut file_io,
                    &mut last_sent,
                ),
                Err(e) => {
                    warn!("{}: malformed packet: {}", self.peer, e);
                    Outcome::Fail(ErrorCode::IllegalOperation.into())
                }
            };

            match outcome {
                Outcome::Continue => {}
                Outcome::Done => {
                    info!("session with {} completed", self.peer);
                    break;
                }
                Outcome::Fail(reply) => {
                    self.send(&reply);
                    warn!("session with {} aborted", self.peer);
                    break;
                }
                Outcome::SilentFail => {
                    warn!("session with {} aborted", self.peer);
                    break;
                }
            }

            retransmissions = 0;
            input = loop {
                match self.next_datagram(retransmissions) {
                    NextDatagram::Received(bytes) => break bytes,
                    NextDatagram::Timeout => {
                        retransmissions += 1;
                        if retransmissions > self.schedule.len() {
                            warn!(
                                "session with {} timed out after {} retransmissions",
                                self.peer,
                                self.schedule.len()
                            );
                            return;
                        }
                        if let Some(ref packet) = last_sent {
                            debug!("resending to {} (attempt {})", self.peer, retransmissions);
                            self.send(packet);
                        }
                        if retransmissions == self.schedule.len() {
                            // budget exhausted: this was the last allowed
                            // resend, don't wait for it to be acked
                            warn!(
                                "session with {} exhausted its retransmission budget",
                                self.peer
                            );
                            return;
                        }
                    }
                }
            };
        }
    }

    /// Blocks for the next datagram from the session's peer, applying the
    /// retransmission schedule's timeout for `attempt`. Datagrams from any
    /// other address are answered with `unknown-tid` and ignored.
    fn next_datagram(&self, attempt: usize) -> NextDatagram {
        let timeout = self.schedule.get(attempt).copied();
        if let Err(e) = self.socket.set_read_timeout(timeout) {
            error!("failed to set socket timeout: {}", e);
        }
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    if from != self.peer {
                        warn!("unknown TID {} while serving {}", from, self.peer);
                        let reply: Packet = ErrorCode::UnknownTid.into();
                        let _ = self.socket.send_to(&reply.to_bytes(), from);
                        continue;
                    }
                    return NextDatagram::Received(buf[..n].to_vec());
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return NextDatagram::Timeout;
                }
                Err(e) => {
                    error!("socket error while serving {}: {}", self.peer, e);
                    return NextDatagram::Timeout;
                }
            }
        }
    }

    fn send(&self, packet: &Packet) {
        if let Err(e) = self.socket.send_to(&packet.to_bytes(), self.peer) {
            error!("failed to send to {}: {}", self.peer, e);
        }
    }

    fn handle_packet(
        &mut self,
        packet: Packet,
        block_number: &mut u16,
        file_io: &mut Option<FileIo>,
        last_sent: &mut Option<Packet>,
    ) -> Outcome {
        match packet {
            Packet::ReadRequest { filename, mode } => {
                self.handle_read_request(&filename, mode, block_number, file_io, last_sent)
            }
            Packet::WriteRequest { filename, mode } => {
                self.handle_write_request(&filename, mode, block_number, last_sent, file_io)
            }
            Packet::Data { block_number: n, data } => {
                self.handle_data(n, &data, block_number, file_io, last_sent)
            }
            Packet::Ack { block_number: n } => {
                self.handle_ack(n, block_number, file_io, last_sent)
            }
            Packet::Error { error_code, message } => {
                warn!(
                    "{}: peer sent error {:?}: {}",
                    self.peer,
                    error_code,
                    String::from_utf8_lossy(&message)
                );
                Outcome::SilentFail
            }
        }
    }

    fn handle_read_request(
        &mut self,
        filename: &[u8],
        mode: crate::packet::TransferMode,
        block_number: &mut u16,
        file_io: &mut Option<FileIo>,
        last_sent: &mut Option<Packet>,
    ) -> Outcome {
        let path = match resolve_path(&self.root, filename) {
            Ok(p) => p,
            Err(code) => return Outcome::Fail(code.into()),
        };

        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Outcome::Fail(ErrorCode::FileNotFound.into());
            }
            Err(_) => return Outcome::Fail(ErrorCode::AccessViolation.into()),
        };
        match file.metadata() {
            Ok(md) if md.is_file() => {}
            _ => return Outcome::Fail(ErrorCode::FileNotFound.into()),
        }

        let mut reader = BlockReader::new(file, mode.into());
        *block_number = 1;
        let data = match reader.next_block() {
            Ok(d) => d,
            Err(_) => return Outcome::Fail(ErrorCode::AccessViolation.into()),
        };
        let is_last = data.len() < crate::packet::MAX_DATA_SIZE;
        let reply = Packet::Data {
            block_number: *block_number,
            data,
        };
        self.send(&reply);
        *last_sent = Some(reply);
        *file_io = Some(FileIo::Reading(reader));
        let _ = is_last; // termination is driven by the matching Ack, not here
        Outcome::Continue
    }

    fn handle_write_request(
        &mut self,
        filename: &[u8],
        mode: crate::packet::TransferMode,
        block_number: &mut u16,
        last_sent: &mut Option<Packet>,
        file_io: &mut Option<FileIo>,
    ) -> Outcome {
        if !self.writable {
            return Outcome::Fail(ErrorCode::AccessViolation.into());
        }
        let path = match resolve_path(&self.root, filename) {
            Ok(p) => p,
            Err(code) => return Outcome::Fail(code.into()),
        };

        let file = match OpenOptions::new().write(true).create(true).truncate(true).open(&path) {
            Ok(f) => f,
            Err(_) => return Outcome::Fail(ErrorCode::AccessViolation.into()),
        };

        let writer = BlockWriter::new(file, mode.into());
        *block_number = 1;
        let reply = Packet::Ack { block_number: 0 };
        self.send(&reply);
        *last_sent = Some(reply);
        *file_io = Some(FileIo::Writing(writer));
        Outcome::Continue
    }

    fn handle_data(
        &mut self,
        n: u16,
        data: &[u8],
        block_number: &mut u16,
        file_io: &mut Option<FileIo>,
        last_sent: &mut Option<Packet>,
    ) -> Outcome {
        if wrapping_gt(n, *block_number) {
            return Outcome::Fail(ErrorCode::UnknownTid.into());
        }
        if n != *block_number {
            // duplicate of an already-written block: our Ack was lost
            let reply = Packet::Ack { block_number: n };
            self.send(&reply);
            *last_sent = Some(reply);
            return Outcome::Continue;
        }

        let writer = match file_io {
            Some(FileIo::Writing(w)) => w,
            _ => return Outcome::Fail(ErrorCode::IllegalOperation.into()),
        };
        if let Err(e) = writer.write_block(data) {
            error!("{}: write failed: {}", self.peer, e);
            return Outcome::Fail(ErrorCode::DiskFull.into());
        }

        let is_last = data.len() < crate::packet::MAX_DATA_SIZE;
        let reply = Packet::Ack { block_number: n };
        self.send(&reply);
        *last_sent = Some(reply);
        *block_number = n.wrapping_add(1);

        if is_last {
            Outcome::Done
        } else {
            Outcome::Continue
        }
    }

    fn handle_ack(
        &mut self,
        n: u16,
        block_number: &mut u16,
        file_io: &mut Option<FileIo>,
        last_sent: &mut Option<Packet>,
    ) -> Outcome {
        if wrapping_gt(n, *block_number) {
            return Outcome::Fail(ErrorCode::UnknownTid.into());
        }
        if n != *block_number {
            if let Some(ref packet) = last_sent {
                self.send(packet);
            }
            return Outcome::Continue;
        }

        let was_last = matches!(last_sent, Some(ref p) if p.is_last_data());
        if was_last {
            return Outcome::Done;
        }

        let reader = match file_io {
            Some(FileIo::Reading(r)) => r,
            _ => return Outcome::Fail(ErrorCode::IllegalOperation.into()),
        };
        let data = match reader.next_block() {
            Ok(d) => d,
            Err(block_io::BlockIoError::Closed) => return Outcome::Done,
            Err(_) => return Outcome::Fail(ErrorCode::AccessViolation.into()),
        };
        *block_number = block_number.wrapping_add(1);
        let reply = Packet::Data {
            block_number: *block_number,
            data,
        };
        self.send(&reply);
        *last_sent = Some(reply);
        Outcome::Continue
    }
}

/// Result of one `handle_packet` call.
enum Outcome {
    /// Keep running; a reply, if any, has already been sent.
    Continue,
    /// Transfer finished successfully; no further reply.
    Done,
    /// Terminate after sending `reply`.
    Fail(Packet),
    /// Terminate without sending anything (peer already told us it gave up).
    SilentFail,
}

enum NextDatagram {
    Received(Vec<u8>),
    Timeout,
}

/// `a > b` under modular u16 arithmetic (RFC 1350 block numbers wrap at
/// 65535 → 0); half the ring is treated as "ahead", the other half "behind".
fn wrapping_gt(a: u16, b: u16) -> bool {
    a.wrapping_sub(b) != 0 && a.wrapping_sub(b) < 0x8000
}

/// Resolves a wire filename against `root`, rejecting any path that would
/// escape it once canonicalized.
fn resolve_path(root: &Path, filename: &[u8]) -> Result<PathBuf, ErrorCode> {
    let filename = String::from_utf8_lossy(filename);
    let relative = Path::new(filename.trim_start_matches(|c| c == '/' || c == '\\'));

    // reject parent-dir / root components outright before touching the filesystem
    for component in relative.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ErrorCode::AccessViolation);
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    let root = root.canonicalize().map_err(|_| ErrorCode::AccessViolation)?;
    let candidate = root.join(relative);

    // the file may not exist yet (WRQ); canonicalize what does exist and
    // re-attach the rest, then check containment
    let checked = match candidate.canonicalize() {
        Ok(c) => c,
        Err(_) => {
            let parent = candidate.parent().unwrap_or(&candidate);
            let canon_parent = parent.canonicalize().map_err(|_| ErrorCode::AccessViolation)?;
            canon_parent.join(candidate.file_name().unwrap_or_else(|| std::ffi::OsStr::new("")))
        }
    };

    if !checked.starts_with(&root) {
        return Err(ErrorCode::AccessViolation);
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_gt_basic() {
        assert!(wrapping_gt(5, 3));
        assert!(!wrapping_gt(3, 5));
        assert!(!wrapping_gt(3, 3));
    }

    #[test]
    fn wrapping_gt_across_boundary() {
        // 0 is "ahead of" 65535 (wrap)
        assert!(wrapping_gt(0, 65535));
        assert!(!wrapping_gt(65535, 0));
    }

    #[test]
    fn resolve_path_rejects_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_path(dir.path(), b"../etc/passwd").unwrap_err();
        assert_eq!(err, ErrorCode::AccessViolation);
    }

    #[test]
    fn resolve_path_rejects_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_path(dir.path(), b"/etc/passwd").unwrap_err();
        assert_eq!(err, ErrorCode::AccessViolation);
    }

    #[test]
    fn resolve_path_accepts_plain_filename() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("greet"), b"hi").unwrap();
        let resolved = resolve_path(dir.path(), b"greet").unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap().join("greet"));
    }

    #[test]
    fn resolve_path_accepts_nonexistent_file_for_write() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_path(dir.path(), b"new_file.txt").unwrap();
        assert_eq!(
            resolved,
            dir.path().canonicalize().unwrap().join("new_file.txt")
        );
    }
}
