//! Transfer Module
//!
//! Bounded-window bulk transfers built on a reusable batch-completion
//! primitive.
//!
//! ## Flow
//! ```text
//!  start ──▶ submit W chunks ──▶ handler(success) ──▶ submit next chunk
//!                                handler(failure) ──▶ record, stop submitting
//!  wait  ◀── settled: input exhausted + 0 outstanding, or first failure
//! ```

mod batch;
mod chunked;

pub use batch::BatchCompletion;
pub use chunked::{store_file, store_files, ChunkSink, Transfer, TransferOptions};
