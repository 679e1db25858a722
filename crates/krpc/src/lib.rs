pub mod bencode;
pub mod message;

pub use bencode::{decode, decode_prefix, Value};
pub use message::*;
