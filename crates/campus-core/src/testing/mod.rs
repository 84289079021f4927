//! Test support: fixtures and an in-memory read model. Shared by this
//! crate's tests and by downstream integration suites.

pub mod fixtures;
mod read_model;

pub use read_model::InMemoryReadModel;
