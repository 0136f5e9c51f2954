//! TCP connection to the coordinator.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use elko_client::transport::{connect, Endpoint};
//!
//! let endpoint = Endpoint::new("127.0.0.1", 9000);
//! let stream = connect(&endpoint, Duration::from_secs(10)).await?;
//! ```

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{ElkoError, Result};

/// Host and port of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Open a TCP connection, giving up after `timeout`.
///
/// Nagle is disabled: frames are already batched by the writer.
pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream> {
    let addr = (endpoint.host.as_str(), endpoint.port);
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(stream) => stream?,
        Err(_) => {
            return Err(ElkoError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {} timed out after {:?}", endpoint, timeout),
            )))
        }
    };

    stream.set_nodelay(true)?;
    debug!(%endpoint, "Connected to coordinator");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let endpoint = Endpoint::new("127.0.0.1", port);
        let (client, accepted) = tokio::join!(
            connect(&endpoint, Duration::from_secs(5)),
            listener.accept()
        );

        let stream = client.unwrap();
        assert!(stream.nodelay().unwrap());
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect(&Endpoint::new("127.0.0.1", port), Duration::from_secs(5)).await;

        let err = result.unwrap_err();
        assert!(matches!(err, ElkoError::Io(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new("127.0.0.1", 9000).to_string(), "127.0.0.1:9000");
    }
}
