//! Event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`]
//! fan-out, and the built-in [`LogWriter`].
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   RetrySession ── publish(Event) ──► Bus ──► manager listener
//!                                                │
//!                                                ▼
//!                                          SubscriberSet::emit
//!                                                │
//!                                     ┌──────────┼──────────┐
//!                                     ▼          ▼          ▼
//!                                 LogWriter   Metrics     Custom
//! ```
//!
//! Each subscriber gets its own bounded queue and worker task; a slow or
//! panicking subscriber never blocks the retry loop or its peers.

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
