//! UDP broadcast transport for swarm frames
//!
//! Best-effort datagram broadcast on a single well-known port shared
//! by every node and the coordinator. No delivery or ordering
//! guarantees; malformed datagrams are dropped where they arrive.

use crate::frame::Frame;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Well-known UDP port for the swarm protocol
pub const DEFAULT_PORT: u16 = 4210;

/// Frames are short delimited ASCII; one MTU is plenty
const MAX_FRAME_SIZE: usize = 1024;

/// UDP transport for sending and receiving swarm frames
pub struct Transport {
    socket: Arc<UdpSocket>,
    port: u16,
    incoming_tx: mpsc::Sender<(Frame, SocketAddr)>,
    incoming_rx: mpsc::Receiver<(Frame, SocketAddr)>,
}

impl Transport {
    /// Bind to the given port with broadcast enabled
    pub async fn new(port: u16) -> Result<Self, std::io::Error> {
        let addr = format!("0.0.0.0:{}", port);
        let socket = UdpSocket::bind(&addr).await?;
        socket.set_broadcast(true)?;

        let (incoming_tx, incoming_rx) = mpsc::channel(256);

        Ok(Self {
            socket: Arc::new(socket),
            port,
            incoming_tx,
            incoming_rx,
        })
    }

    /// Local address this transport is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }

    /// Start receiving frames in the background.
    ///
    /// Datagrams that are not valid UTF-8 or do not parse as a frame
    /// are dropped with a warning and no state change.
    pub fn start_receive(&self) {
        let socket = self.socket.clone();
        let tx = self.incoming_tx.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_FRAME_SIZE];

            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, src)) => {
                        let text = match std::str::from_utf8(&buf[..len]) {
                            Ok(t) => t,
                            Err(_) => {
                                warn!("Dropping non-UTF-8 datagram from {}", src);
                                continue;
                            }
                        };
                        match Frame::parse(text) {
                            Ok(frame) => {
                                debug!("Received {:?} from {}", frame, src);
                                if tx.send((frame, src)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("Dropping malformed frame from {}: {}", src, e);
                            }
                        }
                    }
                    Err(e) => {
                        error!("UDP receive error: {}", e);
                    }
                }
            }
        });
    }

    /// Receive the next parsed frame
    pub async fn recv(&mut self) -> Option<(Frame, SocketAddr)> {
        self.incoming_rx.recv().await
    }

    /// Broadcast a frame to all participants on the shared port.
    ///
    /// Errors (e.g. network not up yet) surface to the caller, whose
    /// periodic loop simply tries again next cycle.
    pub async fn broadcast(&self, frame: &Frame) -> Result<(), std::io::Error> {
        let broadcast_addr: SocketAddr = ([255, 255, 255, 255], self.port).into();
        let wire = frame.encode();
        debug!("Broadcasting {:?} to {}", frame, broadcast_addr);
        self.socket.send_to(wire.as_bytes(), broadcast_addr).await?;
        Ok(())
    }
}
