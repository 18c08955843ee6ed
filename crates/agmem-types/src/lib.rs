// Core types shared by every agmem layer.
// This crate holds the entity model, the error model, and the request
// context; it has no storage or provider dependencies.

pub mod context;
pub mod domain;
pub mod error;

mod util;

pub use context::Ctx;
pub use domain::*;
pub use error::{Error, ErrorKind, Result};
pub use util::*;
