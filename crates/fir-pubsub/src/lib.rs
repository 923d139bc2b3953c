//! # fir-pubsub
//!
//! Channel-scoped publish/subscribe behind the [`Broker`] trait:
//!
//! - [`InMemoryBroker`]: single-process fan-out
//! - [`RedisBroker`]: Redis PUBLISH/SUBSCRIBE across processes
//!
//! Both pass the shared [`contract`] suite.

#![deny(unsafe_code)]

pub mod broker;
pub mod contract;
pub mod errors;
pub mod memory;
pub mod redis_broker;

pub use broker::{Broker, Message, Subscription};
pub use errors::{PubSubError, Result};
pub use memory::InMemoryBroker;
pub use redis_broker::RedisBroker;
