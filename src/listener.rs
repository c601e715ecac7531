use crate::config::ServerConfig;
use crate::counter::ActiveClients;
use crate::handler::{handle_connection, ConnectionContext};
use anyhow::Context;
use std::future::{pending, Future};
use std::net::SocketAddr;
use tokio::net::TcpListener;

pub struct EchoServer {
    listener: TcpListener,
    ctx: ConnectionContext,
}

impl EchoServer {
    /// Resolve and bind the configured address.
    pub async fn bind(config: &ServerConfig) -> anyhow::Result<Self> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to listen on {addr}"))?;

        tracing::info!("TCP server listen at {}", listener.local_addr()?);

        Ok(Self {
            listener,
            ctx: ConnectionContext {
                debug: config.debug,
                idle_timeout: config.idle_timeout,
                clients: ActiveClients::new(),
            },
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn clients(&self) -> ActiveClients {
        self.ctx.clients.clone()
    }

    /// Accept connections forever.
    pub async fn run(self) {
        self.run_until(pending()).await
    }

    /// Accept connections until `shutdown` resolves. Handlers already running
    /// are left to finish on their own.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("TCP server stopped accepting");
                    return;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let ctx = self.ctx.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, &ctx).await;
                        });
                    }
                    Err(e) => tracing::warn!("TCP accept error: {e}"),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::time::{sleep, timeout, Instant};

    async fn start(config: ServerConfig) -> (SocketAddr, ActiveClients) {
        let server = EchoServer::bind(&config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let clients = server.clients();
        tokio::spawn(server.run());
        (addr, clients)
    }

    fn local(debug: bool) -> ServerConfig {
        ServerConfig::new("127.0.0.1", "0", debug)
    }

    async fn echo(stream: &mut TcpStream, msg: &[u8]) -> Vec<u8> {
        stream.write_all(msg).await.unwrap();
        let mut buf = vec![0u8; msg.len()];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    async fn wait_for_active(clients: &ActiveClients, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while clients.active() != expected {
            assert!(Instant::now() < deadline, "active count stuck at {}", clients.active());
            sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn ping_pong_over_tcp() {
        let (addr, clients) = start(local(true)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        assert_eq!(echo(&mut stream, b"ping").await, b"ping");
        assert_eq!(echo(&mut stream, b"pong").await, b"pong");
        assert_eq!(clients.active(), 1);

        drop(stream);
        wait_for_active(&clients, 0).await;
    }

    #[tokio::test]
    async fn counts_concurrent_clients() {
        const N: usize = 8;
        let (addr, clients) = start(local(true)).await;

        let mut streams = Vec::new();
        for i in 0..N {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let msg = format!("client {i}");
            assert_eq!(echo(&mut stream, msg.as_bytes()).await, msg.as_bytes());
            streams.push(stream);
        }
        assert_eq!(clients.active(), N);

        streams.clear();
        wait_for_active(&clients, 0).await;
    }

    #[tokio::test]
    async fn closing_one_client_leaves_others_alone() {
        let (addr, _) = start(local(false)).await;

        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();
        assert_eq!(echo(&mut a, b"a1").await, b"a1");
        assert_eq!(echo(&mut b, b"b1").await, b"b1");

        drop(a);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(echo(&mut b, b"b2").await, b"b2");
    }

    #[tokio::test]
    async fn idle_client_is_disconnected() {
        let config = local(true).with_idle_timeout(Duration::from_millis(200));
        let (addr, clients) = start(config).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("server never closed the idle connection")
            .unwrap();
        assert_eq!(n, 0);
        wait_for_active(&clients, 0).await;
    }

    #[tokio::test]
    async fn second_bind_on_same_port_fails() {
        let first = EchoServer::bind(&local(false)).await.unwrap();
        let port = first.local_addr().unwrap().port().to_string();

        let err = EchoServer::bind(&ServerConfig::new("127.0.0.1", port, false))
            .await
            .err()
            .expect("second bind should fail");
        assert!(err.to_string().contains("failed to listen on"), "{err:#}");
    }

    #[tokio::test]
    async fn unresolvable_host_fails_to_bind() {
        let config = ServerConfig::new("no such host", "19999", false);
        assert!(EchoServer::bind(&config).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_stops_accept_loop() {
        let server = EchoServer::bind(&local(false)).await.unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        timeout(Duration::from_secs(5), task)
            .await
            .expect("accept loop did not stop")
            .unwrap();
    }
}
