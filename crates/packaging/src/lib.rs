//! The service image recipe as data: rendering, parsing and validation.

pub mod dockerfile;
pub mod recipe;
pub mod runtimes;
pub mod validate;

pub use dockerfile::*;
pub use recipe::*;
pub use runtimes::*;
pub use validate::*;
