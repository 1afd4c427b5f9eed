pub mod codec;
pub mod command;
pub mod connection;
pub mod reply;

pub use command::Command;
pub use connection::Connection;
pub use reply::{Limits, Reply};
