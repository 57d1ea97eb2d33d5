//! Handler modules

pub mod connection;
pub mod matching;
pub mod presence;
pub mod signaling;
pub mod typing;

pub use connection::*;
pub use matching::*;
pub use presence::*;
pub use signaling::*;
pub use typing::*;
