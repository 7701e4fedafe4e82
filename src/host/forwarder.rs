//! Forwards raw PCM to a streaming transcription endpoint.
//!
//! The endpoint's own protocol is out of scope: this end opens one TCP
//! connection and writes little-endian 16-bit mono bytes in chunk order.

use crate::error::{MicstreamError, Result};
use crate::host::consumer::{ChunkSink, SinkError};
use crate::host::frame::DecodedChunk;
use log::{debug, info};
use std::io::Write;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Bound on a single write so a stalled peer surfaces as an error.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TranscriptionForwarder {
    addr: String,
    stream: Option<TcpStream>,
    bytes_sent: u64,
    chunks_sent: u64,
}

impl TranscriptionForwarder {
    /// Connect to `addr` (`host:port`), trying each resolved address.
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let resolved = addr
            .to_socket_addrs()
            .map_err(|e| MicstreamError::Forwarder {
                message: format!("cannot resolve {}: {}", addr, e),
            })?;

        let mut last_error = None;
        for socket_addr in resolved {
            match TcpStream::connect_timeout(&socket_addr, timeout) {
                Ok(stream) => {
                    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
                    stream.set_nodelay(true)?;
                    info!("Forwarding audio to {}", socket_addr);
                    return Ok(Self {
                        addr: addr.to_string(),
                        stream: Some(stream),
                        bytes_sent: 0,
                        chunks_sent: 0,
                    });
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(MicstreamError::Forwarder {
            message: match last_error {
                Some(e) => format!("cannot connect to {}: {}", addr, e),
                None => format!("{} resolved to no addresses", addr),
            },
        })
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}

impl ChunkSink for TranscriptionForwarder {
    fn handle(&mut self, chunk: &DecodedChunk) -> std::result::Result<(), SinkError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(SinkError::Fatal("connection closed".to_string()));
        };
        let bytes = chunk.to_le_bytes();
        if let Err(e) = stream.write_all(&bytes) {
            self.stream = None;
            return Err(SinkError::Fatal(format!("write to {} failed: {}", self.addr, e)));
        }
        self.bytes_sent += bytes.len() as u64;
        self.chunks_sent += 1;
        Ok(())
    }

    fn finish(&mut self) -> Option<String> {
        if let Some(stream) = self.stream.take()
            && let Err(e) = stream.shutdown(Shutdown::Write)
        {
            debug!("Forwarder shutdown: {}", e);
        }
        Some(format!(
            "forwarded {} chunks ({} bytes) to {}",
            self.chunks_sent, self.bytes_sent, self.addr
        ))
    }

    fn name(&self) -> &'static str {
        "forwarder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_forwards_le_bytes_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).unwrap();
            received
        });

        let mut forwarder = TranscriptionForwarder::connect(&addr, Duration::from_secs(1)).unwrap();
        for seq in 0..3u64 {
            forwarder
                .handle(&DecodedChunk {
                    sequence: seq,
                    samples: vec![seq as i16, -1],
                })
                .unwrap();
        }
        let summary = forwarder.finish().unwrap();

        assert!(summary.contains("3 chunks"));
        assert_eq!(
            server.join().unwrap(),
            vec![0, 0, 0xff, 0xff, 1, 0, 0xff, 0xff, 2, 0, 0xff, 0xff]
        );
    }

    #[test]
    fn test_connect_refused_is_forwarder_error() {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let result = TranscriptionForwarder::connect(
            &format!("127.0.0.1:{}", port),
            Duration::from_millis(200),
        );
        assert!(matches!(result, Err(MicstreamError::Forwarder { .. })));
    }

    #[test]
    fn test_unresolvable_address() {
        let result = TranscriptionForwarder::connect("not an address", Duration::from_millis(10));
        assert!(matches!(result, Err(MicstreamError::Forwarder { .. })));
    }

    #[test]
    fn test_write_after_peer_closes_becomes_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            drop(socket);
        });

        let mut forwarder = TranscriptionForwarder::connect(&addr, Duration::from_secs(1)).unwrap();
        server.join().unwrap();

        let chunk = DecodedChunk {
            sequence: 0,
            samples: vec![0; 160],
        };
        // The first writes may still land in the kernel buffer.
        let mut result = Ok(());
        for _ in 0..100 {
            result = forwarder.handle(&chunk);
            if result.is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(result, Err(SinkError::Fatal(_))));
        assert!(matches!(forwarder.handle(&chunk), Err(SinkError::Fatal(_))));
    }
}
