//! Lifecycle kernel: pluggable components ordered by numeric priorities,
//! publishing into a shared namespace.

mod api;
mod component;
mod lifecycle;

pub use {
    api::Api,
    component::{ALL_MODES, Component, RunMode},
    lifecycle::Registry,
};
