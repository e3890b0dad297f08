pub mod coordinator;
pub mod protocol;
pub mod tile;
pub mod transport;

pub use coordinator::*;
pub use protocol::*;
pub use tile::*;
pub use transport::*;
