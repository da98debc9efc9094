use super::{Frame, TransportError, read_frame};
use parking_lot::Mutex;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Per-connection poll slice while scanning for a ready frame.
const POLL_SLICE: Duration = Duration::from_millis(20);
/// Once a frame header has arrived, the payload is expected promptly.
const PAYLOAD_TIMEOUT: Duration = Duration::from_secs(2);

/// Collector-side pull endpoint: many Workers push, one Collector pulls.
///
/// Accepts are non-blocking and connections are polled round-robin under a
/// short read timeout, so `recv_timeout` honors its bound and frames are
/// delivered in arrival order per connection.
pub struct PullTransport {
    listener: TcpListener,
    connections: Mutex<Vec<TcpStream>>,
}

enum ReadOutcome {
    Frame(Frame),
    Idle,
    Closed,
}

impl PullTransport {
    /// Bind the receiving endpoint.
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            connections: Mutex::new(Vec::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Blocking receive bounded by `timeout`; `Ok(None)` on timeout.
    ///
    /// Decode failures surface as errors without losing stream alignment,
    /// so the caller can log and keep pulling.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Frame>, TransportError> {
        let deadline = Instant::now() + timeout;

        loop {
            self.accept_pending()?;

            let mut connections = self.connections.lock();
            let mut index = 0;
            while index < connections.len() {
                match try_read_frame(&mut connections[index]) {
                    Ok(ReadOutcome::Frame(frame)) => return Ok(Some(frame)),
                    Ok(ReadOutcome::Idle) => index += 1,
                    Ok(ReadOutcome::Closed) => {
                        debug!("worker connection closed");
                        connections.swap_remove(index);
                    }
                    Err(e) => {
                        // Framing is intact for decode errors; a broken
                        // stream is dropped before reporting
                        if matches!(e, TransportError::Io(_) | TransportError::FrameTooLarge(_)) {
                            warn!("dropping worker connection: {e}");
                            connections.swap_remove(index);
                        }
                        return Err(e);
                    }
                }
            }
            drop(connections);

            if Instant::now() >= deadline {
                return Ok(None);
            }
            // An unproductive pass always yields for a slice; a connection
            // holding a partial header returns from peek instantly and must
            // not spin the loop.
            std::thread::sleep(POLL_SLICE.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    /// Drop all worker connections. The listener itself closes on drop.
    pub fn close(&self) {
        self.connections.lock().clear();
    }

    fn accept_pending(&self) -> Result<(), TransportError> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!("accepted worker connection from {peer}");
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(Some(POLL_SLICE))?;
                    self.connections.lock().push(stream);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Try to pull one frame without blocking past the connection's poll slice.
///
/// The 4-byte header is peeked first, so a slice that elapses mid-arrival
/// consumes nothing and the stream stays aligned for the next poll.
fn try_read_frame(stream: &mut TcpStream) -> Result<ReadOutcome, TransportError> {
    let mut header = [0u8; 4];
    match stream.peek(&mut header) {
        Ok(0) => return Ok(ReadOutcome::Closed),
        Ok(n) if n < 4 => return Ok(ReadOutcome::Idle),
        Ok(_) => {}
        Err(e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            return Ok(ReadOutcome::Idle);
        }
        Err(e) => return Err(e.into()),
    }

    // The sender writes whole frames, so once the header is visible the
    // rest follows promptly
    stream.set_read_timeout(Some(PAYLOAD_TIMEOUT))?;
    let result = read_frame(stream);
    stream.set_read_timeout(Some(POLL_SLICE))?;

    Ok(ReadOutcome::Frame(result?))
}
