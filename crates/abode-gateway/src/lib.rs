/// Abode Gateway
///
/// Realtime WebSocket delivery of chat and visit events. Best effort: a user
/// with no open connection simply misses the event, push covers the rest.

pub mod connection;
pub mod sessions;

pub use connection::handle_connection;
pub use sessions::SessionTable;
