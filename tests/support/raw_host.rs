//! Image host on a bare TCP socket, for responses wiremock cannot produce:
//! bodies shorter than their `Content-Length` and bodies sent slowly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// How the host answers every `GET`.
#[derive(Debug, Clone)]
pub struct RawBehaviour {
    /// Body served for any path.
    pub body: Vec<u8>,
    /// The first `truncate_first` connections get half the body, then EOF.
    pub truncate_first: usize,
    /// The body is sent in four chunks with this pause in between.
    pub chunk_delay: Duration,
}

pub struct RawImageHost {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

impl RawImageHost {
    pub fn uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

pub async fn spawn_raw_image_host(behaviour: RawBehaviour) -> std::io::Result<RawImageHost> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);
    let behaviour = Arc::new(behaviour);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let behaviour = Arc::clone(&behaviour);
            tokio::spawn(async move {
                let _ = serve(stream, index, &behaviour).await;
            });
        }
    });
    Ok(RawImageHost { addr, connections })
}

async fn serve(mut stream: TcpStream, index: usize, behaviour: &RawBehaviour) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..n]);
    }

    let body = &behaviour.body;
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;

    if index < behaviour.truncate_first {
        stream.write_all(&body[..body.len() / 2]).await?;
    } else {
        for chunk in body.chunks(body.len().div_ceil(4).max(1)) {
            stream.write_all(chunk).await?;
            stream.flush().await?;
            tokio::time::sleep(behaviour.chunk_delay).await;
        }
    }
    stream.shutdown().await
}
