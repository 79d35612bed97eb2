//! A tabular data-processing core: typed rows, a lazy expression
//! language, a streaming dataflow engine, a SQL push-down planner, and
//! a mutable-dataset/warehouse layer for committing changes back.
//!
//! ```ascii
//!                Expr / Formula
//!                      │
//!                      ▼
//!   Dataset ──stream()──► Stream ──► Raster (materialisation)
//!      │                                │
//!      ├──sql()──► SQLFragment text      │
//!      │                                │
//!      └──mutate()──► MutableDataset ────┘
//! ```
//!
//! `Dataset` is the lazy, composable surface (`filter`, `calculate`,
//! `aggregate`, `join`, …); `Stream` is the pull-based row source it
//! compiles down to; `SQLDataset` additionally tracks a pushed-down SQL
//! fragment alongside the streaming fallback so a caller with a real
//! connection can run the generated text instead of pulling rows
//! in-process.

#![allow(clippy::result_large_err)]

pub mod concurrency;
mod dataset;
pub mod error;
pub mod expr;
pub mod formula;
pub mod mutable;
mod raster;
pub mod sql;
pub mod stream;
pub mod value;

pub use dataset::{Dataset, DatasetSummary, Options};
pub use error::{Error, Fallible, Reason};
pub use formula::parse_formula;
pub use raster::Raster;
