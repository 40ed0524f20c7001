//! Helpers shared by the integration tests

#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

use tiny_pipes::{File, IoctlCommand, PipeConfig, PipeDriver};

/// Independent driver with `pipe_size` byte buffers
pub fn driver(pipe_size: usize) -> PipeDriver {
    PipeDriver::new(PipeConfig::default().with_pipe_size(pipe_size))
        .expect("test configuration should be valid")
}

/// Spins until `cond` holds, failing the test after five seconds
pub fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Waits until `file`'s pipe holds exactly `count` bytes
pub fn wait_for_buffered(file: &File, count: usize) {
    wait_for(|| file.ioctl(IoctlCommand::BytesAvailable).expect("ioctl should succeed") == count);
}

/// Gives a freshly spawned task time to block
pub fn settle() {
    thread::sleep(Duration::from_millis(50));
}
