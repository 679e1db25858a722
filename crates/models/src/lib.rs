pub mod config;
pub mod error;
pub mod id;
pub mod node;
pub mod torrent;

pub use config::*;
pub use error::*;
pub use id::*;
pub use node::*;
pub use torrent::*;
