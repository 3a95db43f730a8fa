//! Embedded Redis client: the command/subscriber connection pair, the
//! deployment key layout, and the presence scripts.

mod client;
mod component;
pub mod keys;
pub mod scripts;

pub use {
    client::RedisHandle,
    component::{NAMESPACE, RedisComponent},
};
