//! Job, Future, and the StreamPuller built on top of them (spec §4.1, §5).
//!
//! None of this is grounded in the teacher crate (a single-threaded
//! compiler has no need for it); the locking and thread-pool choices
//! are grounded on `parking_lot`/`rayon`, both already dependencies
//! elsewhere in the retrieval pack (`sqruff-lib`, `surrealdb-core`).

mod future;
mod job;
mod puller;

pub use future::Future;
pub use job::{Job, Qos};
pub use puller::{Source, StreamPuller, WavefrontId};
