pub mod server;
pub mod service;
pub mod tracing;

pub use server::*;
pub use service::*;
pub use self::tracing::*;
