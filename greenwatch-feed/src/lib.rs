pub mod config;
pub mod connection;
pub mod router;
pub mod state;

pub use config::{Config, EnvironmentConfig, FeedConfig, ReconnectConfig, ServerConfig};
pub use connection::manager::{ConnectionHandle, ConnectionManager};
pub use connection::mock::MockTransport;
pub use connection::ws::WsTransport;
pub use connection::{
    ConnectionError, ConnectionState, Link, LinkEvent, ReconnectPolicy, Transport,
};
pub use router::{Diagnostic, Dispatch, MessageRouter};
pub use state::{DashboardState, Store};
