//! Domain layer public interface.
//!
//! This module defines the backend collaborator interface the manager is
//! written against. It is independent of any concrete client library.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod backend;

// --- Backend domain re-exports ---

pub use backend::{
    //
    MessageCallback,
    PubSubClient,
    PubSubClientPtr,
    Subscriber,
};
