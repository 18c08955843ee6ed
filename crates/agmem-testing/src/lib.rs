//! Fixtures for agmem tests: scripted providers with controllable behavior
//! and a fully wired in-memory engine world.

mod providers;
mod world;

pub use providers::{FailingEmbedder, ScriptedJudge, StaticEmbedder};
pub use world::TestWorld;
