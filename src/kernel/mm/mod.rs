// src/kernel/mm/mod.rs
//! Memory management module

pub mod pool;

pub use pool::{BufferPool, HeapStats, PoolBlock};
