use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::capture::connection::CapturedConnection;
use crate::capture::relay;
use crate::capture::session::CaptureSession;
use crate::models::config::ListenerConfig;
use crate::models::event::CaptureEvent;
use crate::models::version::ProtocolVersion;
use crate::utils::error::{AppError, AppResult};

/// Accepts game clients and relays each one to the configured server
pub struct Listener {
    /// Settings read at each accept
    config: Arc<RwLock<ListenerConfig>>,

    /// Where accepted connections are registered
    session: Arc<CaptureSession>,

    /// Bytes per relay read
    read_buffer: usize,

    /// Accept loop, while running
    running: Mutex<Option<Running>>,
}

struct Running {
    local_addr: SocketAddr,
    /// Cleared under the write lock on stop; clients register under the read lock
    accepting: Arc<RwLock<bool>>,
    accept_task: JoinHandle<()>,
}

/// Listener state for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerStatus {
    pub running: bool,
    pub local_addr: Option<SocketAddr>,
    pub config: ListenerConfig,
    pub open_connections: usize,
}

impl Listener {
    pub fn new(config: ListenerConfig, session: Arc<CaptureSession>, read_buffer: usize) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            session,
            read_buffer,
            running: Mutex::new(None),
        }
    }

    /// Bind `listen_port` and start accepting clients for `target_host:target_port`.
    ///
    /// Bind failures are returned here and leave the settings as they were.
    /// Per-client failures are logged and published.
    pub async fn start(
        &self,
        listen_port: u16,
        target_host: &str,
        target_port: u16,
        protocol_version: ProtocolVersion,
    ) -> AppResult<SocketAddr> {
        if self.is_running() {
            return Err(AppError::InvalidOperation("listener is already running".to_string()));
        }

        let addr = format!("0.0.0.0:{}", listen_port);
        let listener = TcpListener::bind(&addr).await.map_err(|source| {
            error!("Failed to bind {}: {}", addr, source);
            AppError::BindError {
                addr: addr.clone(),
                source,
            }
        })?;
        let local_addr = listener.local_addr()?;

        let mut running = self.running.lock();
        if running.is_some() {
            // another start won the race; our socket is dropped here
            return Err(AppError::InvalidOperation("listener is already running".to_string()));
        }

        {
            let mut config = self.config.write();
            config.target_host = target_host.to_string();
            config.target_port = target_port;
            config.protocol_version = protocol_version;
        }

        let accepting = Arc::new(RwLock::new(true));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.config.clone(),
            self.session.clone(),
            self.read_buffer,
            accepting.clone(),
        ));

        info!(
            "Listening on {} and relaying to {}:{} ({})",
            local_addr, target_host, target_port, self.config.read().protocol_version
        );

        *running = Some(Running {
            local_addr,
            accepting,
            accept_task,
        });
        Ok(local_addr)
    }

    /// Stop accepting and close every open live connection. Returns false if not running.
    pub fn stop(&self) -> bool {
        let Some(running) = self.running.lock().take() else {
            return false;
        };

        *running.accepting.write() = false;
        running.accept_task.abort();

        let open = self.session.open_connections();
        for connection in &open {
            if let Err(e) = connection.disconnect() {
                warn!("Failed to disconnect {}: {}", connection.name(), e);
            }
        }

        info!("Listener on {} stopped, closed {} connections", running.local_addr, open.len());
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    pub fn config(&self) -> ListenerConfig {
        self.config.read().clone()
    }

    /// Applies to connections accepted from now on
    pub fn set_target_host(&self, host: &str) {
        info!("Target host set to {}", host);
        self.config.write().target_host = host.to_string();
    }

    /// Applies to connections accepted from now on
    pub fn set_target_port(&self, port: u16) {
        info!("Target port set to {}", port);
        self.config.write().target_port = port;
    }

    /// Set the version for new connections, and for open ones too when `propagate` is set
    pub fn set_protocol_version(&self, version: ProtocolVersion, propagate: bool) {
        info!("Protocol version set to {} (propagate: {})", version, propagate);
        if propagate {
            for connection in self.session.open_connections() {
                connection.set_protocol_version(version.clone());
            }
        }
        self.config.write().protocol_version = version;
    }

    pub fn status(&self) -> ListenerStatus {
        ListenerStatus {
            running: self.is_running(),
            local_addr: self.local_addr(),
            config: self.config(),
            open_connections: self.session.open_connections().len(),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<RwLock<ListenerConfig>>,
    session: Arc<CaptureSession>,
    read_buffer: usize,
    accepting: Arc<RwLock<bool>>,
) {
    loop {
        match listener.accept().await {
            Ok((client, peer)) => {
                let config = config.read().clone();
                info!("Accepted client {}", peer);
                tokio::spawn(handle_client(
                    client,
                    peer,
                    config,
                    session.clone(),
                    read_buffer,
                    accepting.clone(),
                ));
            }
            Err(e) => {
                warn!("Accept failed: {}", e);
                // avoid spinning on persistent errors such as fd exhaustion
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Connect an accepted client to the target and start relaying
async fn handle_client(
    client: TcpStream,
    peer: SocketAddr,
    config: ListenerConfig,
    session: Arc<CaptureSession>,
    read_buffer: usize,
    accepting: Arc<RwLock<bool>>,
) {
    let target = format!("{}:{}", config.target_host, config.target_port);

    let server = match TcpStream::connect(&target).await {
        Ok(server) => server,
        Err(e) => {
            let err = AppError::ConnectError {
                target: target.clone(),
                source: e,
            };
            error!("Client {}: {}", peer, err);
            drop(client);
            session.events().publish(CaptureEvent::ConnectFailed {
                peer,
                target,
                error: err.to_string(),
            });
            return;
        }
    };

    let _ = client.set_nodelay(true);
    let _ = server.set_nodelay(true);

    // stop() either sees this connection as open or we see it stopped
    let accepting = accepting.read();
    if !*accepting {
        info!("Listener stopped while connecting {}, dropping it", peer);
        return;
    }

    let connection = CapturedConnection::live(
        format!("{} -> {}", peer, target),
        config.protocol_version,
        session.events().clone(),
    );
    info!("Relaying {}", connection.name());

    session.insert(connection.clone());
    session.events().publish(CaptureEvent::ClientConnected(connection.clone()));
    relay::start_relay(client, server, &connection, read_buffer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::connection::ConnectionKind;
    use crate::models::event::EventBus;
    use crate::models::packet::Direction;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Echo server that prefixes nothing and returns what it gets
    async fn echo_server() -> SocketAddr {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = server.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    loop {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if socket.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });
        addr
    }

    async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<CaptureEvent>) -> CaptureEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .unwrap()
    }

    fn new_listener() -> (Listener, Arc<CaptureSession>) {
        let session = Arc::new(CaptureSession::new(EventBus::new(256)));
        (
            Listener::new(ListenerConfig::default(), session.clone(), 4096),
            session,
        )
    }

    #[tokio::test]
    async fn test_relay_through_listener() {
        let target = echo_server().await;
        let (listener, session) = new_listener();
        let mut events = session.events().subscribe();

        let version = ProtocolVersion::new(1, 4, "ENG");
        let addr = listener
            .start(0, "127.0.0.1", target.port(), version.clone())
            .await
            .unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
        let connection = match next_event(&mut events).await {
            CaptureEvent::ClientConnected(c) => c,
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(connection.kind(), ConnectionKind::Live);
        assert_eq!(connection.protocol_version(), version);

        client.write_all(&[0xC1, 0x03, 0x0E]).await.unwrap();
        let mut buf = [0u8; 3];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0xC1, 0x03, 0x0E]);

        // one record each way
        for _ in 0..2 {
            assert!(matches!(next_event(&mut events).await, CaptureEvent::PacketAppended { .. }));
        }
        let records = connection.snapshot();
        assert_eq!(records[0].direction(), Direction::ClientToServer);
        assert_eq!(records[1].direction(), Direction::ServerToClient);
        assert_eq!(session.list().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_target_reports_failure() {
        // grab a free port, then close it so nothing listens there
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();

        let (listener, session) = new_listener();
        let mut events = session.events().subscribe();
        let addr = listener
            .start(0, "127.0.0.1", dead.port(), ProtocolVersion::default())
            .await
            .unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
        match next_event(&mut events).await {
            CaptureEvent::ConnectFailed { target, .. } => {
                assert_eq!(target, format!("127.0.0.1:{}", dead.port()));
            }
            other => panic!("unexpected event {:?}", other),
        }

        // the client socket is closed and no connection was created
        let mut rest = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert!(session.list().is_empty());
        assert!(listener.is_running());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let (listener, _session) = new_listener();
        let result = listener
            .start(port, "127.0.0.1", 1, ProtocolVersion::default())
            .await;
        assert!(matches!(result, Err(AppError::BindError { .. })));
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn test_failed_start_keeps_settings() {
        let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let (listener, _session) = new_listener();
        let before = listener.config();

        let result = listener
            .start(port, "10.9.9.9", 5555, ProtocolVersion::new(9, 9, "KOR"))
            .await;
        assert!(matches!(result, Err(AppError::BindError { .. })));

        let after = listener.config();
        assert_eq!(after.target_host, before.target_host);
        assert_eq!(after.target_port, before.target_port);
        assert_eq!(after.protocol_version, before.protocol_version);
        assert_eq!(listener.status().config.target_port, before.target_port);

        // a second start on a running listener leaves the running settings alone too
        let target = echo_server().await;
        listener
            .start(0, "127.0.0.1", target.port(), ProtocolVersion::default())
            .await
            .unwrap();
        assert!(listener.start(0, "10.9.9.9", 5555, ProtocolVersion::default()).await.is_err());
        assert_eq!(listener.config().target_port, target.port());
        assert_eq!(listener.config().target_host, "127.0.0.1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_client_finishing_connect_during_stop_is_dropped() {
        let target = echo_server().await;
        let session = Arc::new(CaptureSession::new(EventBus::new(16)));
        let front = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let front_addr = front.local_addr().unwrap();

        let mut client = TcpStream::connect(front_addr).await.unwrap();
        let (accepted, peer) = front.accept().await.unwrap();

        let config = ListenerConfig {
            target_host: "127.0.0.1".to_string(),
            target_port: target.port(),
            ..ListenerConfig::default()
        };
        let accepting = Arc::new(RwLock::new(true));

        // a stop is in progress while the target connect completes
        let stopping = accepting.write();
        let task = tokio::spawn(handle_client(
            accepted,
            peer,
            config,
            session.clone(),
            1024,
            accepting.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut stopping = stopping;
        *stopping = false;
        drop(stopping);

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(session.list().is_empty());
        assert!(session.open_connections().is_empty());

        let mut rest = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_stop_closes_open_connections() {
        let target = echo_server().await;
        let (listener, session) = new_listener();
        let mut events = session.events().subscribe();
        let addr = listener
            .start(0, "127.0.0.1", target.port(), ProtocolVersion::default())
            .await
            .unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
        let connection = match next_event(&mut events).await {
            CaptureEvent::ClientConnected(c) => c,
            other => panic!("unexpected event {:?}", other),
        };

        assert!(listener.stop());
        assert!(!listener.stop());
        assert!(!connection.is_connected());

        let mut rest = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);

        // the port no longer accepts
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(("127.0.0.1", addr.port())).await.is_err());
    }

    #[tokio::test]
    async fn test_config_changes_apply_to_new_connections() {
        let first = echo_server().await;
        let second = echo_server().await;
        let (listener, session) = new_listener();
        let mut events = session.events().subscribe();
        let addr = listener
            .start(0, "127.0.0.1", first.port(), ProtocolVersion::new(1, 0, "ENG"))
            .await
            .unwrap();

        let _c1 = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
        let conn1 = match next_event(&mut events).await {
            CaptureEvent::ClientConnected(c) => c,
            other => panic!("unexpected event {:?}", other),
        };

        listener.set_target_port(second.port());
        listener.set_protocol_version(ProtocolVersion::new(2, 0, "KOR"), false);

        let _c2 = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
        let conn2 = match next_event(&mut events).await {
            CaptureEvent::ClientConnected(c) => c,
            other => panic!("unexpected event {:?}", other),
        };

        assert_eq!(conn1.protocol_version(), ProtocolVersion::new(1, 0, "ENG"));
        assert_eq!(conn2.protocol_version(), ProtocolVersion::new(2, 0, "KOR"));
        assert!(conn2.name().ends_with(&format!(":{}", second.port())));

        listener.set_protocol_version(ProtocolVersion::new(3, 0, "JPN"), true);
        assert_eq!(conn1.protocol_version(), ProtocolVersion::new(3, 0, "JPN"));
    }
}
