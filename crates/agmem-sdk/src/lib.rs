//! Public SDK for the agmem versioned knowledge store.
//!
//! Transports (REST, MCP, CLI) wrap a [`Client`]; embedders and judges plug
//! in through [`ClientBuilder`].
//!
//! ```no_run
//! use agmem_sdk::Client;
//! use agmem_types::Ctx;
//! use agmem_engine::WriteFactRequest;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::builder().open("agmem.db")?;
//! let ctx = Ctx::background();
//! client.branches().ensure_main(&ctx).await?;
//! client
//!     .facts()
//!     .write(&ctx, WriteFactRequest::new("the deploy runs on Fridays", "main"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod client;

pub use client::{Client, ClientBuilder};

pub use agmem_engine as engine;
pub use agmem_providers as providers;
pub use agmem_types as types;
