//! Stowage - quota enforcement and notification layers for an image registry
//!
//! Every image, task and membership a caller touches is a chain of proxies
//! over the raw entity. This library crate exposes the layers, the gateway
//! that composes them, and the supporting configuration.

pub mod config;
pub mod domain;
pub mod gateway;
pub mod guard;
pub mod notifier;
pub mod quota;
pub mod repo;
pub mod store;
