use super::{Frame, TransportError, write_frame};
use parking_lot::Mutex;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Worker-side push endpoint.
///
/// The TCP connection is opened lazily on the first send and dropped on any
/// send failure, so the next attempt reconnects. A failed send reports
/// `TransportError` to the caller, which re-offers the batch entries to the
/// Error Buffer; nothing is retried at this layer.
pub struct PushTransport {
    endpoint: String,
    stream: Mutex<Option<TcpStream>>,
}

impl PushTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            stream: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Push one frame, connecting first if needed.
    pub fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let mut guard = self.stream.lock();
        if guard.is_none() {
            *guard = Some(self.open_stream()?);
            debug!("connected to collector at {}", self.endpoint);
        }

        if let Some(stream) = guard.as_mut()
            && let Err(e) = write_frame(stream, frame)
        {
            // Drop the broken connection; the next send reconnects
            *guard = None;
            return Err(e);
        }
        Ok(())
    }

    /// Drop the connection. The next send would reconnect.
    pub fn close(&self) {
        *self.stream.lock() = None;
    }

    fn open_stream(&self) -> Result<TcpStream, TransportError> {
        let addrs = self
            .endpoint
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        let mut last_error = std::io::Error::other("endpoint resolved to no addresses");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
                    return Ok(stream);
                }
                Err(e) => last_error = e,
            }
        }

        Err(TransportError::Connect {
            endpoint: self.endpoint.clone(),
            source: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LogEntry;

    #[test]
    fn test_send_to_unreachable_endpoint_fails() {
        // Port 1 is essentially never listening on loopback
        let transport = PushTransport::new("127.0.0.1:1");
        let result = transport.send(&Frame::entry(LogEntry::text("lost")));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn test_unresolvable_endpoint_fails() {
        let transport = PushTransport::new("definitely-not-a-host.invalid:9999");
        let result = transport.send(&Frame::entry(LogEntry::text("lost")));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
