//! Runtime events and the broadcast bus.
//!
//! Every observable step of a retry session is published as an [`Event`] on
//! the [`Bus`]; the manager forwards them to registered subscribers. Events
//! carry a global monotonic `seq` for ordering and optional metadata fields
//! set per [`EventKind`].

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
