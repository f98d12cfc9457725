use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config, NoTls};
use tracing::{debug, error, info};

/// A client together with the task driving its connection.
///
/// Dropping it aborts the connection task, which closes the socket and any
/// server-side cursor still open on it.
pub struct PgConnection {
    client: Client,
    connection_task: JoinHandle<()>,
}

impl PgConnection {
    pub async fn connect(config: &Config, label: &str) -> Result<Self, tokio_postgres::Error> {
        debug!(connection = label, "Connecting to PostgreSQL");

        let (client, connection) = config.connect(NoTls).await?;

        let task_label = label.to_string();
        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(connection = %task_label, "Connection error: {}", e);
            }
        });

        let conn = Self {
            client,
            connection_task,
        };

        // Cursor values and row JSON are rendered in UTC regardless of server defaults.
        conn.client.batch_execute("SET TIME ZONE 'UTC'").await?;

        info!(connection = label, "Connected to PostgreSQL");
        Ok(conn)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        self.connection_task.abort();
    }
}
