//! Pipe creation, reuse and teardown

mod common;

use std::io::{Read, Write};
use std::sync::Arc;

use tiny_pipes::sync::Waiter;
use tiny_pipes::{
    DeviceRegistry, ErrorKind, FileOperations, IoctlCommand, KernelResult, OpenFlags, PipeConfig,
    PipeDriver, PollEvents, SlotId, TeardownPolicy,
};

use common::driver;

/// Placeholder node occupying a path
struct Squatter;

impl FileOperations for Squatter {
    fn open(&self, _flags: OpenFlags) -> KernelResult<()> {
        Ok(())
    }

    fn close(&self, _flags: OpenFlags) -> KernelResult<()> {
        Ok(())
    }

    fn read(&self, _flags: OpenFlags, _buf: &mut [u8]) -> KernelResult<usize> {
        Ok(0)
    }

    fn write(&self, _flags: OpenFlags, buf: &[u8]) -> KernelResult<usize> {
        Ok(buf.len())
    }

    fn poll(
        &self,
        _flags: OpenFlags,
        _interest: PollEvents,
        _waiter: Option<&Arc<Waiter>>,
    ) -> PollEvents {
        PollEvents::empty()
    }
}

#[test]
fn hello_short_reads_then_eof() {
    let driver = driver(64);
    let (reader, writer) = driver.pipe().expect("pipe should be created");

    assert_eq!(writer.write(b"hello").unwrap(), 5);

    let mut buf = [0u8; 3];
    assert_eq!(reader.read(&mut buf).unwrap(), 3);
    assert_eq!(&buf, b"hel");

    let mut buf = [0u8; 10];
    assert_eq!(reader.read(&mut buf).unwrap(), 2);
    assert_eq!(&buf[..2], b"lo");

    writer.close().expect("close should succeed");
    assert_eq!(reader.read(&mut buf).unwrap(), 0);
}

#[test]
fn thirty_third_pipe_is_refused() {
    let driver = PipeDriver::new(PipeConfig::default()).unwrap();
    let mut pipes = Vec::new();
    for slot in 0..32 {
        let pair = driver.pipe().expect("slot should be available");
        assert_eq!(pair.0.path(), format!("/dev/pipe{}", slot));
        pipes.push(pair);
    }

    let err = driver.pipe().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TooManyOpenFiles);
    assert_eq!(err.errno(), 23);

    // Freeing any pipe makes its slot the next one handed out
    drop(pipes.remove(5));
    let (reader, _writer) = driver.pipe().expect("freed slot should be reusable");
    assert_eq!(reader.path(), "/dev/pipe5");
    assert_eq!(driver.slots().occupied_count(), 32);
}

#[test]
fn writer_close_drains_then_eof() {
    let driver = driver(64);
    let (reader, writer) = driver.pipe().unwrap();
    writer.write(b"abc").unwrap();
    drop(writer);

    let mut buf = [0u8; 8];
    assert_eq!(reader.read(&mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"abc");
    assert_eq!(reader.read(&mut buf).unwrap(), 0);
    assert_eq!(reader.read(&mut buf).unwrap(), 0);
}

#[test]
fn write_after_reader_close_is_broken_pipe() {
    let driver = driver(64);
    let (reader, writer) = driver.pipe().unwrap();
    drop(reader);

    let err = writer.write(b"data").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BrokenPipe);
    assert_eq!(err.errno(), 32);
}

#[test]
fn closed_pipe_slot_and_path_are_reused() {
    let driver = driver(64);
    let (reader, writer) = driver.pipe().unwrap();
    let path = reader.path().to_owned();
    drop(reader);
    drop(writer);

    assert_eq!(driver.slots().occupied_count(), 0);
    assert!(!driver.registry().contains(&path));
    assert_eq!(driver.pool().stats().current_usage, 0);

    let (reader, _writer) = driver.pipe().unwrap();
    assert_eq!(reader.path(), path);
}

#[test]
fn out_of_memory_leaves_no_trace() {
    let config = PipeConfig::default()
        .with_pipe_size(64)
        .with_pool_size(100)
        .with_max_pipes(4);
    let driver = PipeDriver::new(config).unwrap();
    let first = driver.pipe().expect("first buffer should fit");

    let err = driver.pipe().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    assert!(err.is_exhaustion());
    assert!(!driver.slots().is_occupied(SlotId(1)));
    assert!(!driver.slots().is_created(SlotId(1)));
    assert!(!driver.registry().contains("/dev/pipe1"));
    assert_eq!(driver.pool().stats().failed_allocations, 1);

    drop(first);
    let (reader, _writer) = driver.pipe().expect("memory should be back");
    assert_eq!(reader.path(), "/dev/pipe0");
}

#[test]
fn registration_failure_leaves_no_trace() {
    let registry = Arc::new(DeviceRegistry::new(8));
    registry
        .register_driver("/dev/pipe0", 0o666, Arc::new(Squatter))
        .unwrap();
    let driver = PipeDriver::with_registry(PipeConfig::default(), Arc::clone(&registry)).unwrap();

    let err = driver.pipe().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RegistrationFailed);
    assert_eq!(driver.slots().occupied_count(), 0);
    assert!(!driver.slots().is_created(SlotId(0)));
    assert_eq!(registry.len(), 1);
    assert_eq!(driver.pool().stats().current_usage, 0);

    registry.unregister_driver("/dev/pipe0").unwrap();
    let (reader, _writer) = driver.pipe().expect("path is free again");
    assert_eq!(reader.path(), "/dev/pipe0");
}

#[test]
fn persistent_device_is_reused() {
    let config = PipeConfig::default().with_policy(TeardownPolicy::Persistent);
    let driver = PipeDriver::new(config).unwrap();

    let (reader, writer) = driver.pipe().unwrap();
    writer.write(b"stale").unwrap();
    drop(writer);
    drop(reader);

    // Slot is free, the node and device stay
    assert_eq!(driver.slots().occupied_count(), 0);
    assert!(driver.slots().is_created(SlotId(0)));
    assert!(driver.registry().contains("/dev/pipe0"));
    assert_eq!(driver.pool().stats().current_usage, 0);

    let err = driver.open("/dev/pipe0", OpenFlags::WRONLY).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let (reader, writer) = driver.pipe().unwrap();
    assert_eq!(reader.path(), "/dev/pipe0");
    assert_eq!(driver.registry().len(), 1);
    assert_eq!(reader.ioctl(IoctlCommand::BytesAvailable).unwrap(), 0);

    writer.write(b"fresh").unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(reader.read(&mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], b"fresh");
}

#[test]
fn set_policy_through_ioctl() {
    let driver = driver(64);
    let (reader, writer) = driver.pipe().unwrap();
    writer
        .ioctl(IoctlCommand::SetPolicy(TeardownPolicy::Persistent))
        .unwrap();
    drop(reader);
    drop(writer);

    assert!(driver.registry().contains("/dev/pipe0"));
    assert!(driver.slots().is_created(SlotId(0)));

    driver.unlink("/dev/pipe0").unwrap();
    assert!(!driver.slots().is_created(SlotId(0)));
}

#[test]
fn unlink_keeps_open_handles_working() {
    let driver = driver(64);
    let (reader, writer) = driver.pipe().unwrap();

    driver.unlink("/dev/pipe0").unwrap();
    assert!(!driver.registry().contains("/dev/pipe0"));
    assert_eq!(
        driver.open("/dev/pipe0", OpenFlags::RDONLY).unwrap_err().kind(),
        ErrorKind::NotFound
    );

    writer.write(b"x").unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(reader.read(&mut buf).unwrap(), 1);
    assert!(driver.slots().is_created(SlotId(0)));

    drop(reader);
    drop(writer);
    assert!(!driver.slots().is_created(SlotId(0)));
    assert_eq!(driver.slots().occupied_count(), 0);

    let (reader, _writer) = driver.pipe().unwrap();
    assert_eq!(reader.path(), "/dev/pipe0");
    assert!(driver.registry().contains("/dev/pipe0"));
}

#[test]
fn open_by_path_joins_the_pipe() {
    let driver = driver(64);
    let (reader, writer) = driver.pipe().unwrap();

    let second_writer = driver.open("/dev/pipe0", OpenFlags::WRONLY).unwrap();
    drop(writer);

    second_writer.write(b"via path").unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(reader.read(&mut buf).unwrap(), 8);
    assert_eq!(&buf[..8], b"via path");

    drop(second_writer);
    assert_eq!(reader.read(&mut buf).unwrap(), 0);
}

#[test]
fn cloned_writer_keeps_pipe_open() {
    let driver = driver(64);
    let (reader, writer) = driver.pipe().unwrap();
    let clone = writer.try_clone().unwrap();
    drop(writer);

    clone.write(b"z").unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(reader.read(&mut buf).unwrap(), 1);

    drop(clone);
    assert_eq!(reader.read(&mut buf).unwrap(), 0);
}

#[test]
fn handles_enforce_direction() {
    let driver = driver(64);
    let (reader, writer) = driver.pipe().unwrap();

    assert_eq!(reader.write(b"x").unwrap_err().kind(), ErrorKind::BadDescriptor);
    assert_eq!(writer.read(&mut [0u8; 1]).unwrap_err().kind(), ErrorKind::BadDescriptor);
    assert_eq!(reader.flags(), OpenFlags::RDONLY);
    assert_eq!(writer.flags(), OpenFlags::WRONLY);
}

#[test]
fn std_io_round_trip() {
    let driver = driver(64);
    let (mut reader, mut writer) = driver.pipe().unwrap();

    writer.write_all(b"line one\n").unwrap();
    writer.flush().unwrap();
    drop(writer);

    let mut text = String::new();
    reader.read_to_string(&mut text).unwrap();
    assert_eq!(text, "line one\n");
}

#[test]
fn ioctl_reports_buffer_state() {
    let driver = driver(16);
    let (reader, writer) = driver.pipe().unwrap();
    writer.write(b"12345").unwrap();

    assert_eq!(reader.ioctl(IoctlCommand::Capacity).unwrap(), 16);
    assert_eq!(reader.ioctl(IoctlCommand::BytesAvailable).unwrap(), 5);
    assert_eq!(writer.ioctl(IoctlCommand::FreeSpace).unwrap(), 11);
}

#[test]
fn global_driver_creates_pipes() {
    let (reader, writer) = tiny_pipes::pipe().expect("global driver should have free slots");
    assert!(reader.path().starts_with("/dev/pipe"));
    assert_eq!(reader.path(), writer.path());

    writer.write(b"!").unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(reader.read(&mut buf).unwrap(), 1);
}
