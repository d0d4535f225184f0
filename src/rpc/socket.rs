//! TCP socket layer: multipart framing and short lived outbound request sockets.
//!
//! A frame on the wire is a big-endian `u32` part count, followed by every
//! part as a big-endian `u32` length and its bytes.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::trace;

use crate::common::Frame;

/// Maximum number of parts accepted in a single frame.
pub const MAX_PARTS: usize = 16;
/// Maximum size of a single part.
pub const MAX_PART_SIZE: usize = 64 * 1024;

/// Writes a frame and flushes the writer.
pub fn write_frame<W: Write>(writer: &mut W, frame: &[Bytes]) -> io::Result<()> {
    if frame.len() > MAX_PARTS {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame has {} parts, at most {MAX_PARTS} allowed", frame.len()),
        ));
    }

    let mut buf = Vec::with_capacity(4 + frame.iter().map(|p| 4 + p.len()).sum::<usize>());
    buf.extend_from_slice(&(frame.len() as u32).to_be_bytes());

    for part in frame {
        if part.len() > MAX_PART_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame part of {} bytes is too large", part.len()),
            ));
        }
        buf.extend_from_slice(&(part.len() as u32).to_be_bytes());
        buf.extend_from_slice(part);
    }

    writer.write_all(&buf)?;
    writer.flush()
}

/// Reads a single frame, blocking until it is complete.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Frame> {
    let count = read_u32(reader)? as usize;
    if count > MAX_PARTS {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame announces {count} parts, at most {MAX_PARTS} allowed"),
        ));
    }

    let mut frame = Vec::with_capacity(count);

    for _ in 0..count {
        let len = read_u32(reader)? as usize;
        if len > MAX_PART_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame part announces {len} bytes"),
            ));
        }

        let mut part = vec![0; len];
        reader.read_exact(&mut part)?;
        frame.push(Bytes::from(part));
    }

    Ok(frame)
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// A one-shot outbound connection to a node, closed when dropped.
///
/// Connecting, sending and receiving all share one deadline.
#[derive(Debug)]
pub struct RequestSocket {
    stream: TcpStream,
    deadline: Instant,
}

impl RequestSocket {
    pub fn connect(ip: &str, port: u16, timeout: Duration) -> io::Result<Self> {
        let deadline = Instant::now() + timeout;
        let address = resolve(ip, port)?;

        let stream = TcpStream::connect_timeout(&address, timeout)?;
        stream.set_nodelay(true)?;

        trace!(context = "socket_connect", ?address);

        Ok(Self { stream, deadline })
    }

    pub fn send(&mut self, frame: &[Bytes]) -> io::Result<()> {
        self.stream.set_write_timeout(Some(self.remaining()?))?;
        write_frame(&mut self.stream, frame)
    }

    pub fn recv(&mut self) -> io::Result<Frame> {
        self.stream.set_read_timeout(Some(self.remaining()?))?;
        read_frame(&mut self.stream)
    }

    fn remaining(&self) -> io::Result<Duration> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());

        if remaining.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "request deadline elapsed",
            ));
        }

        Ok(remaining)
    }
}

fn resolve(ip: &str, port: u16) -> io::Result<SocketAddr> {
    (ip, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{ip}:{port} did not resolve to any address"),
        )
    })
}

#[cfg(test)]
mod test {
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    #[test]
    fn frame_round_trip() {
        let frame = vec![
            Bytes::from_static(b"Chord"),
            Bytes::new(),
            Bytes::from(vec![7; 300]),
        ];

        let mut buf: Vec<u8> = vec![];
        write_frame(&mut buf, &frame).unwrap();

        assert_eq!(&buf[..4], &[0, 0, 0, 3]);
        assert_eq!(&buf[4..8], &[0, 0, 0, 5]);
        assert_eq!(read_frame(&mut Cursor::new(buf)).unwrap(), frame);
    }

    #[test]
    fn reject_oversized_frames() {
        let mut buf: Vec<u8> = vec![];
        buf.extend_from_slice(&(MAX_PARTS as u32 + 1).to_be_bytes());
        let error = read_frame(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);

        let mut buf: Vec<u8> = vec![];
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(&(MAX_PART_SIZE as u32 + 1).to_be_bytes());
        let error = read_frame(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);

        let too_many = vec![Bytes::new(); MAX_PARTS + 1];
        assert!(write_frame(&mut Vec::<u8>::new(), &too_many).is_err());
    }

    #[test]
    fn truncated_frame() {
        let mut buf: Vec<u8> = vec![];
        write_frame(&mut buf, &[Bytes::from_static(b"Ping")]).unwrap();
        buf.truncate(buf.len() - 1);

        let error = read_frame(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn request_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_frame(&mut stream).unwrap();
            write_frame(&mut stream, &request[1..]).unwrap();
        });

        let mut socket = RequestSocket::connect("127.0.0.1", port, Duration::from_secs(2)).unwrap();
        socket
            .send(&[Bytes::from_static(b"a"), Bytes::from_static(b"b")])
            .unwrap();

        assert_eq!(socket.recv().unwrap(), vec![Bytes::from_static(b"b")]);

        server.join().unwrap();
    }

    #[test]
    fn silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let timeout = Duration::from_millis(200);
        let mut socket = RequestSocket::connect("127.0.0.1", port, timeout).unwrap();
        socket.send(&[Bytes::from_static(b"Ping")]).unwrap();

        let start = Instant::now();
        assert!(socket.recv().is_err());
        assert!(start.elapsed() < Duration::from_secs(2));

        drop(listener);
    }
}
