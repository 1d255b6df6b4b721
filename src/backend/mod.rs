//! Backend implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `PubSubClient` / `Subscriber` traits, exposed only through constructor
//! functions. The redis backends sit behind the `backend_redis` feature.
//!
//! Domain code must not depend on backend-specific types.

mod memory;
mod redis;

pub use memory::{create_memory_client, create_memory_client_with_hub, MemoryHub};

pub use self::redis::create_redis_client;
