mod aggregate;
pub use aggregate::*;

mod errors;
pub use errors::*;
mod event;
pub use event::*;

mod event_store;
pub use event_store::*;

pub mod es;

mod context;
pub use context::*;
mod snapshot;
pub use snapshot::*;
mod strategy;
pub use strategy::*;

mod publisher;
pub use publisher::*;
pub mod publishers;

mod repository;
pub use repository::*;
mod session;
pub use session::*;

#[cfg(test)]
pub mod testing;
