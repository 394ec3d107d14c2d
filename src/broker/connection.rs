//! Long-lived broker connection shared by producers and consumers.

use lapin::{Channel, Connection, ConnectionProperties};
use tracing::{info, warn};

/// Owns the single AMQP connection for the process.
///
/// Channel creation is the only mutation and is safe for concurrent callers.
/// Connection-level failures are observed here purely for logging; recovery is
/// the transport's concern, and a connection loss is fatal to every dependent.
pub struct ConnectionManager {
    connection: Connection,
}

impl ConnectionManager {
    /// Establish the connection and attach the error observer.
    pub async fn connect(uri: &str) -> Result<Self, lapin::Error> {
        let connection = Connection::connect(uri, ConnectionProperties::default()).await?;

        connection.on_error(|error| {
            warn!(error = %error, "broker connection error");
        });

        info!("broker connection established");

        Ok(Self { connection })
    }

    /// Open a new channel on the shared connection.
    pub async fn create_channel(&self) -> Result<Channel, lapin::Error> {
        self.connection.create_channel().await
    }

    /// Close the connection, detaching all channels.
    pub async fn close(&self) -> Result<(), lapin::Error> {
        info!("closing broker connection");
        self.connection.close(200, "shutting down").await
    }
}
