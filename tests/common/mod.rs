#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use elko_client::protocol::{
    ClientHello, ClientMessage, ClientOpcode, FrameBuffer, IntegrityKey, ServerHello,
    ServerMessage, PROTOCOL_VERSION,
};
use elko_client::{ClientBuilder, ClientConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const SERVICE_ID: &str = "billing";

/// Listener standing in for the coordinator.
pub struct FakeCoordinator {
    listener: TcpListener,
    pub addr: SocketAddr,
}

impl FakeCoordinator {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self { listener, addr }
    }

    /// Builder pointed at this coordinator, with heartbeats off so tests
    /// only see the frames they provoke.
    pub fn builder(&self) -> ClientBuilder {
        let mut config = ClientConfig::new(SERVICE_ID);
        config.host = self.addr.ip().to_string();
        config.port = self.addr.port();
        config.heartbeat_interval = None;
        config.handshake_timeout = Duration::from_secs(2);
        ClientBuilder::new(config)
    }

    /// Accept one worker and consume its version byte and `ClientHello`.
    pub async fn accept(&self) -> (Session, ClientHello) {
        let (stream, _) = self.listener.accept().await.unwrap();
        let mut session = Session::new(stream, SERVICE_ID);

        let mut version = [0u8; 1];
        session.stream.read_exact(&mut version).await.unwrap();
        assert_eq!(version[0], PROTOCOL_VERSION);

        match session.recv().await {
            Some(ClientMessage::Hello(hello)) => (session, hello),
            other => panic!("expected ClientHello, got {:?}", other),
        }
    }
}

/// Coordinator side of one worker connection.
pub struct Session {
    pub stream: TcpStream,
    pub key: Arc<IntegrityKey>,
    buffer: FrameBuffer<ClientOpcode>,
}

impl Session {
    fn new(stream: TcpStream, service_id: &str) -> Self {
        let key = Arc::new(IntegrityKey::derive(service_id));
        Self {
            stream,
            buffer: FrameBuffer::new(key.clone()),
            key,
        }
    }

    pub async fn send(&mut self, message: ServerMessage) {
        let bytes = message.seal(&self.key).unwrap().to_vec();
        self.stream.write_all(&bytes).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn hello(&mut self) {
        self.send(ServerMessage::Hello(ServerHello {
            node_id: "node-1".to_string(),
        }))
        .await;
    }

    /// Next frame from the worker, or `None` once it closes the socket.
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(frame) = self.buffer.next_frame().unwrap() {
                return Some(ClientMessage::from_frame(&frame).unwrap());
            }
            let n = self.stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return None;
            }
            self.buffer.extend(&chunk[..n]);
        }
    }

    /// Next frame that is not a heartbeat, bounded by a timeout.
    pub async fn expect(&mut self) -> ClientMessage {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match self.recv().await {
                    Some(ClientMessage::Heartbeat) => continue,
                    Some(message) => return message,
                    None => panic!("worker closed the connection"),
                }
            }
        })
        .await
        .expect("timed out waiting for a frame")
    }
}
