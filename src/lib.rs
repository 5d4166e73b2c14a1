//! Scopekeeper - opaque identifiers with expiring scope grants
//!
//! This library provides the identity store, the expiration policy and the
//! HTTP surface of the Scopekeeper service. It exposes all modules for testing purposes.

pub mod access;
pub mod entities;
pub mod errors;
pub mod expiry;
pub mod scopes;
pub mod settings;
pub mod storage;
pub mod validate;
pub mod web;
