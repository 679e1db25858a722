pub mod fake_node;
pub mod fake_peer;
pub mod fixtures;

pub use fake_node::*;
pub use fake_peer::*;
pub use fixtures::*;
