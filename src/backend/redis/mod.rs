//! Redis backends.
//!
//! - standalone: one server, multiplexed publish connections
//! - cluster: cluster publish connections through a seed node
//!
//! Both share the pub/sub subscriber implementation in `client.rs`.

#[cfg(feature = "backend_redis")]
mod client;

#[cfg(feature = "backend_redis")]
pub use self::client::create_client as create_redis_client;

#[cfg(not(feature = "backend_redis"))]
pub async fn create_redis_client(
    _config: &crate::PubSubConfig,
) -> crate::Result<crate::PubSubClientPtr> {
    Err(crate::Error::InvalidConfig(
        "backend_redis feature is not enabled".into(),
    ))
}
