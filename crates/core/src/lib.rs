pub mod catalog;
pub mod connection;
pub mod error;
pub mod fk_resolver;
pub mod gateway;
pub mod model;
pub mod notifications;
pub mod record_set;
pub mod scheduler;
pub mod session;
pub mod settings;

#[cfg(test)]
mod test_support;

pub use gateway::{Backend, BackendError, BackendErrorKind, Gateway};
pub use session::BrowserSession;
