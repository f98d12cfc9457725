pub mod connection;
pub mod source;

pub use connection::PgConnection;
pub use source::PostgresSource;
