//! Tooling around a content-addressable installer engine: a builder for
//! declarative repository manifests and a scenario-driven harness that
//! exercises the engine through its command-line surface.
//!
//! The engine itself is the system under test; it is only ever reached by
//! shelling out to its CLI and inspecting the filesystem it mutates.

pub mod actions;
pub mod engine;
pub mod environment;
pub mod manifest;
pub mod runner;
pub mod scenario;
pub mod util;
pub mod xml;
