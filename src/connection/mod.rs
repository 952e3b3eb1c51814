pub(crate) mod driver;
pub mod handshake;
pub mod state;
pub mod transport;

pub use handshake::ServerInfo;
pub use state::{ConnectionEvent, ConnectionState};
pub use transport::Transport;
