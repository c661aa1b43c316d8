//! Input/output for sequencing reads.

pub mod fastx;

pub use fastx::{FastxReader, FastxRecord};
