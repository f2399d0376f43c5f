//! Palisade - embeddable policy decision engine
//!
//! Policies are KDL documents (one resource kind per document) compiled
//! into an immutable in-memory store; decisions are pure functions of
//! (principal, resource, actions, store). A declarative test runner
//! executes suite documents against the same engine.

pub mod condition;
pub mod engine;
pub mod errors;
pub mod policy;
pub mod runner;
pub mod settings;
pub mod store;
pub mod suite;
pub mod types;
pub mod web;
