//! # vector-db
//!
//! an append-only, log-structured on-disk store for fixed-dimension int8
//! vectors. [`db`] holds the single-threaded state machine (`VectorDatabase`);
//! [`worker`] wraps it in a dedicated OS thread and exposes the async
//! [`VectorDb`] handle callers actually use. [`header`] and [`wal`] cover the
//! on-disk formats; [`search`] has the top-K keeper and the SIMD dot-product
//! kernel.

pub mod db;
pub mod error;
pub mod header;
pub mod search;
pub mod wal;
pub mod worker;

pub use db::VectorDatabase;
pub use error::{Error, Result};
pub use search::{dot_product_i8, ScoreKeeper};
pub use worker::VectorDb;
