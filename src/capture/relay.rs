use log::{debug, info, trace, warn};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::capture::connection::CapturedConnection;
use crate::models::packet::Direction;

/// Write half shared between a pump and `CapturedConnection::send`
pub type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

/// Running relay of one live connection: the two pump tasks and the socket write halves.
///
/// Dropping the handles after aborting the pumps releases every reference to
/// both sockets, which closes them.
#[derive(Debug)]
pub struct RelayHandles {
    to_server: SharedWriter,
    to_client: SharedWriter,
    pumps: Vec<JoinHandle<()>>,
}

impl RelayHandles {
    /// Writer that carries packets travelling in `direction`
    pub fn writer_for(&self, direction: Direction) -> SharedWriter {
        match direction {
            Direction::ClientToServer => self.to_server.clone(),
            Direction::ServerToClient => self.to_client.clone(),
        }
    }

    pub fn abort(self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

/// One-directional copy loop that records every chunk it forwards
pub struct RelayPump {
    direction: Direction,
    source: OwnedReadHalf,
    destination: SharedWriter,
    connection: Arc<CapturedConnection>,
    buffer_size: usize,
}

impl RelayPump {
    pub fn new(
        direction: Direction,
        source: OwnedReadHalf,
        destination: SharedWriter,
        connection: Arc<CapturedConnection>,
        buffer_size: usize,
    ) -> Self {
        Self {
            direction,
            source,
            destination,
            connection,
            buffer_size: buffer_size.max(1),
        }
    }

    /// Copy until either side closes or fails, then close the whole connection.
    ///
    /// Each successful read becomes exactly one packet record.
    pub async fn run(mut self) {
        let mut buf = vec![0u8; self.buffer_size];
        let mut chunks = 0u64;

        loop {
            let n = match self.source.read(&mut buf).await {
                Ok(0) => {
                    info!("{} {} peer closed", self.connection.name(), self.direction);
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("{} {} read failed: {}", self.connection.name(), self.direction, e);
                    break;
                }
            };

            trace!("{} {} relaying {} bytes", self.connection.name(), self.direction, n);

            let record = match self.connection.append(self.direction, buf[..n].to_vec()) {
                Ok(record) => record,
                Err(e) => {
                    warn!("{} {} capture failed: {}", self.connection.name(), self.direction, e);
                    break;
                }
            };
            chunks += 1;

            let written = {
                let mut destination = self.destination.lock().await;
                destination.write_all(record.payload()).await
            };
            if let Err(e) = written {
                warn!("{} {} write failed: {}", self.connection.name(), self.direction, e);
                break;
            }
        }

        debug!("{} {} pump finished after {} chunks", self.connection.name(), self.direction, chunks);
        self.connection.close();
    }
}

/// Start both pumps for an accepted client and its server socket
pub fn start_relay(
    client: TcpStream,
    server: TcpStream,
    connection: &Arc<CapturedConnection>,
    buffer_size: usize,
) {
    let (client_read, client_write) = client.into_split();
    let (server_read, server_write) = server.into_split();

    let to_client: SharedWriter = Arc::new(Mutex::new(client_write));
    let to_server: SharedWriter = Arc::new(Mutex::new(server_write));

    let outbound = RelayPump::new(
        Direction::ClientToServer,
        client_read,
        to_server.clone(),
        connection.clone(),
        buffer_size,
    );
    let inbound = RelayPump::new(
        Direction::ServerToClient,
        server_read,
        to_client.clone(),
        connection.clone(),
        buffer_size,
    );

    let pumps = vec![tokio::spawn(outbound.run()), tokio::spawn(inbound.run())];

    connection.attach_relay(RelayHandles {
        to_server,
        to_client,
        pumps,
    });
}
