// SQLite storage substrate.
// Engines see logical, branch-scoped operations; the branch dimension is a
// discriminator column with PRIMARY KEY (id, branch_name) on the five
// branched tables. Table-level fork is emulated by a transactional row copy.

mod db;
mod schema;

pub mod branching;
pub mod queries;
pub mod search;

pub use branching::{BranchPayload, RowSetDiff};
pub use db::{parse_ts, to_ts, Store};
pub use schema::{BRANCHED_TABLES, SCHEMA_VERSION};
pub use search::{FulltextHit, VectorHit};
