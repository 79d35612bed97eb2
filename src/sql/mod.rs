//! SQL push-down: [SQLDialect], [SQLFragment], [SQLDataset] (spec §4.7).
//!
//! Specific database drivers are out of scope for this crate (spec
//! Non-goals) — this module only ever emits SQL text. `SQLDataset`
//! still answers `raster`/`stream` correctly by delegating to the
//! streaming engine underneath; `sql()` is the artifact a caller with
//! a real connection would execute.

mod dataset;
mod dialect;
mod fragment;
mod gen_expr;

pub use dataset::SQLDataset;
pub use dialect::{Dialect, SQLDialect};
pub use fragment::{FragmentKind, SQLFragment};
pub use gen_expr::{translate_expr, ExprContext};
