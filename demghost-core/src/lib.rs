//! # demghost-core
//!
//! Quake demo parsing and ghost merging.
//!
//! This crate contains pure parsing, tracking and rewriting logic with **no I/O
//! and no logging**. It takes whole demo files as byte slices and hands back
//! bytes; reading files and reporting progress is the caller's job.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  demghost-core                                              │
//! │  ├── demo       (block framing)                             │
//! │  ├── protocol/  (protocol 15 message decoding & encoding)   │
//! │  ├── stream     (decoded recording)                         │
//! │  ├── tracker    (entity table, view binding, trajectory)    │
//! │  ├── models     (model precache merging)                    │
//! │  ├── ghost      (entity ids, update synthesis, playback)    │
//! │  └── merge      (the merge driver)                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                 ┌────────────┴────────────┐
//!                 │  demghost (CLI)         │
//!                 └─────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! let base = std::fs::read("base.dem").unwrap();
//! let ghost = std::fs::read("ghost.dem").unwrap();
//! let merged = demghost_core::merge(&base, &[ghost]).unwrap();
//! std::fs::write("out.dem", merged).unwrap();
//! ```

pub mod demo;
pub mod error;
pub mod ghost;
pub mod merge;
pub mod models;
pub mod protocol;
pub mod stream;
pub mod tracker;

// Re-export commonly used types
pub use demo::DemoFile;
pub use error::{DemoError, Error, StreamId};
pub use ghost::{synthesize, GhostTrack};
pub use merge::{merge, GhostPlacement, MergeOptions, Merged, Merger, OversizedBlock};
pub use stream::{Block, Stream};
pub use tracker::{track, StreamSummary, Target, TrajectorySample};
