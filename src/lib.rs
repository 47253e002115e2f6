pub mod capture;
pub mod completion;
pub mod config;
pub mod drag;
pub mod error;
pub mod export;
pub mod field;
pub mod geometry;
pub mod layout;
pub mod mode;
pub mod session;
pub mod signing;
pub mod source;
pub mod store;
pub mod upload;
pub mod worker;

pub use error::{ErrorKind, Result, SignError};
pub use session::Session;
