//! Asynchronous pipe pair over one device handle.
//!
//! A pipe keeps at most one transfer in flight per direction and exposes the
//! non-blocking submit / wait / harvest cycle the worker's tick loop is
//! built on. [`DuplexPipes`] owns the shared device reference and
//! serialises each direction behind its own mutex.
//!
//! Every operation reports an [`OpStatus`] rather than an error: result
//! codes are ordinary control-flow values for the polling state machine,
//! and the raw OS error rides along purely for diagnostics.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::device::{RawDevice, TransferDir, WaitOutcome};

/// Passing this to the sync entry points means "wait indefinitely".
///
/// The zero sentinel is part of the wire-facing contract; use it only with
/// [`ReadPipe::sync`] / [`WritePipe::sync`] and the duplex sync wrappers.
/// Any positive duration is a literal deadline.
pub const SYNC_INFINITE: Duration = Duration::ZERO;

/// Result code of a pipe operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Success,
    /// The previous transfer is still executing (or a wait timed out).
    StillExecuting,
    /// The handle is, or has become, unusable.
    InvalidFile,
}

/// Status plus the OS error code observed, zero when none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpResult {
    pub status: OpStatus,
    pub os_error: u32,
}

impl OpResult {
    fn ok() -> OpResult {
        OpResult { status: OpStatus::Success, os_error: 0 }
    }

    fn of(status: OpStatus) -> OpResult {
        OpResult { status, os_error: 0 }
    }

    fn invalid(os_error: u32) -> OpResult {
        OpResult { status: OpStatus::InvalidFile, os_error }
    }
}

/// Result of a read harvest: status, OS error, and the kernel byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResult {
    pub status: OpStatus,
    pub os_error: u32,
    pub bytes: u32,
}

impl ReadResult {
    fn of(status: OpStatus) -> ReadResult {
        ReadResult { status, os_error: 0, bytes: 0 }
    }

    fn invalid(os_error: u32) -> ReadResult {
        ReadResult { status: OpStatus::InvalidFile, os_error, bytes: 0 }
    }
}

/// Zero-initialised owned byte region used for transfer staging and
/// harvesting.
pub struct IoBuffer {
    data: Box<[u8]>,
}

impl IoBuffer {
    pub fn new(len: usize) -> IoBuffer {
        IoBuffer { data: vec![0u8; len].into_boxed_slice() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

fn wait_outcome_to_status(outcome: WaitOutcome) -> OpResult {
    match outcome {
        WaitOutcome::Completed => OpResult::ok(),
        WaitOutcome::TimedOut => OpResult::of(OpStatus::StillExecuting),
        // An abandoned or failed wait is indistinguishable from a dead
        // handle at this layer; both surface as InvalidFile.
        WaitOutcome::Failed(code) => OpResult::invalid(code),
    }
}

fn timeout_of(timeout: Duration) -> Option<Duration> {
    if timeout == SYNC_INFINITE { None } else { Some(timeout) }
}

/// Inbound half: submits reads and harvests their results.
pub struct ReadPipe {
    dev: Arc<dyn RawDevice>,
    buffer_len: usize,
    result_consumed: bool,
}

impl ReadPipe {
    pub fn new(dev: Arc<dyn RawDevice>, buffer_len: usize) -> ReadPipe {
        ReadPipe { dev, buffer_len, result_consumed: false }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    pub fn is_valid(&self) -> bool {
        self.dev.is_open()
    }

    pub fn is_executing(&self) -> bool {
        self.dev.is_executing(TransferDir::Read)
    }

    /// Submits the next read. Non-blocking; `StillExecuting` if the
    /// previous read has not completed yet.
    pub fn read(&mut self) -> OpResult {
        if !self.is_valid() {
            return OpResult::of(OpStatus::InvalidFile);
        }
        if self.is_executing() {
            return OpResult::of(OpStatus::StillExecuting);
        }
        match self.dev.begin_read(self.buffer_len) {
            Ok(()) => {
                // A fresh submission owns the result slot again.
                self.result_consumed = false;
                OpResult::ok()
            }
            Err(code) => OpResult::invalid(code),
        }
    }

    /// Waits for the in-flight read. [`SYNC_INFINITE`] waits forever; an
    /// idle pipe reports success immediately.
    pub fn sync(&self, timeout: Duration) -> OpStatus {
        if !self.is_valid() {
            return OpStatus::InvalidFile;
        }
        if !self.is_executing() {
            return OpStatus::Success;
        }
        wait_outcome_to_status(self.dev.wait(TransferDir::Read, timeout_of(timeout))).status
    }

    /// Harvests a completed read into `out`.
    ///
    /// The first harvest after a completion copies
    /// `min(kernel_bytes, out.len())` bytes and reports the kernel count;
    /// every further harvest without a new read succeeds with zero bytes.
    pub fn take_result(&mut self, out: &mut [u8]) -> ReadResult {
        if !self.is_valid() {
            return ReadResult::of(OpStatus::InvalidFile);
        }
        if self.is_executing() {
            return ReadResult::of(OpStatus::StillExecuting);
        }
        if self.result_consumed {
            return ReadResult::of(OpStatus::Success);
        }
        match self.dev.read_result(out) {
            Ok(bytes) => {
                self.result_consumed = true;
                ReadResult { status: OpStatus::Success, os_error: 0, bytes }
            }
            Err(code) => ReadResult::invalid(code),
        }
    }

    /// Submits a read and blocks for its result within `timeout`.
    pub fn read_sync(&mut self, out: &mut [u8], timeout: Duration) -> ReadResult {
        let submitted = self.read();
        match submitted.status {
            OpStatus::Success => match self.sync(timeout) {
                OpStatus::Success => self.take_result(out),
                OpStatus::StillExecuting => ReadResult::of(OpStatus::StillExecuting),
                OpStatus::InvalidFile => ReadResult::of(OpStatus::InvalidFile),
            },
            status => ReadResult { status, os_error: submitted.os_error, bytes: 0 },
        }
    }

    /// Cancels the in-flight read, if any.
    pub fn cancel(&self) {
        if self.is_executing() {
            self.dev.cancel(TransferDir::Read);
        }
    }
}

/// Outbound half: stages and submits writes.
pub struct WritePipe {
    dev: Arc<dyn RawDevice>,
    buffer_len: usize,
}

impl WritePipe {
    pub fn new(dev: Arc<dyn RawDevice>, buffer_len: usize) -> WritePipe {
        WritePipe { dev, buffer_len }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    pub fn is_valid(&self) -> bool {
        self.dev.is_open()
    }

    pub fn is_executing(&self) -> bool {
        self.dev.is_executing(TransferDir::Write)
    }

    /// Submits `data`, zero-padded to the pipe's transfer size so short
    /// payloads still go out as full reports. Non-blocking.
    pub fn write(&mut self, data: &[u8]) -> OpResult {
        debug_assert!(data.len() <= self.buffer_len);
        if !self.is_valid() {
            return OpResult::of(OpStatus::InvalidFile);
        }
        if self.is_executing() {
            return OpResult::of(OpStatus::StillExecuting);
        }
        let mut staged = vec![0u8; self.buffer_len];
        let n = data.len().min(self.buffer_len);
        staged[..n].copy_from_slice(&data[..n]);
        match self.dev.begin_write(&staged) {
            Ok(()) => OpResult::ok(),
            Err(code) => OpResult::invalid(code),
        }
    }

    /// Waits for the in-flight write. [`SYNC_INFINITE`] waits forever.
    pub fn sync(&self, timeout: Duration) -> OpStatus {
        if !self.is_valid() {
            return OpStatus::InvalidFile;
        }
        if !self.is_executing() {
            return OpStatus::Success;
        }
        wait_outcome_to_status(self.dev.wait(TransferDir::Write, timeout_of(timeout))).status
    }

    /// Submits `data` and blocks until it is on the wire or `timeout`
    /// elapses.
    pub fn write_sync(&mut self, data: &[u8], timeout: Duration) -> OpResult {
        let submitted = self.write(data);
        if submitted.status == OpStatus::Success {
            return OpResult::of(self.sync(timeout));
        }
        submitted
    }

    pub fn cancel(&self) {
        if self.is_executing() {
            self.dev.cancel(TransferDir::Write);
        }
    }
}

/// Transfer sizes of a duplex pair.
#[derive(Debug, Clone, Copy)]
pub struct PipeParams {
    pub read_buffer_len: usize,
    pub write_buffer_len: usize,
}

/// Both pipe halves over one shared device.
///
/// The aggregate owns the canonical device reference; both pipes hold
/// non-owning clones, so replacing the whole `DuplexPipes` value is the
/// move path and drops the previous handle once the last clone goes away.
/// Each direction is serialised by its own mutex; neither mutex is ever
/// held across a wait on the other direction. A pipe mutex poisoned by a
/// panicking thread degrades to `InvalidFile` rather than spreading the
/// panic.
pub struct DuplexPipes {
    dev: Arc<dyn RawDevice>,
    params: PipeParams,
    read: Mutex<ReadPipe>,
    write: Mutex<WritePipe>,
}

impl DuplexPipes {
    pub fn new(dev: Arc<dyn RawDevice>, params: PipeParams) -> DuplexPipes {
        DuplexPipes {
            read: Mutex::new(ReadPipe::new(Arc::clone(&dev), params.read_buffer_len)),
            write: Mutex::new(WritePipe::new(Arc::clone(&dev), params.write_buffer_len)),
            params,
            dev,
        }
    }

    /// The shared device reference (for liveness checks elsewhere).
    pub fn device(&self) -> Arc<dyn RawDevice> {
        Arc::clone(&self.dev)
    }

    pub fn is_file_valid(&self) -> bool {
        self.dev.is_open()
    }

    pub fn read_buffer_len(&self) -> usize {
        self.params.read_buffer_len
    }

    pub fn write_buffer_len(&self) -> usize {
        self.params.write_buffer_len
    }

    pub fn read(&self) -> OpResult {
        match self.read.lock() {
            Ok(mut pipe) => pipe.read(),
            Err(_) => OpResult::of(OpStatus::InvalidFile),
        }
    }

    pub fn read_sync(&self, out: &mut [u8], timeout: Duration) -> ReadResult {
        match self.read.lock() {
            Ok(mut pipe) => pipe.read_sync(out, timeout),
            Err(_) => ReadResult::of(OpStatus::InvalidFile),
        }
    }

    /// Harvests the last completed read without issuing a new one.
    pub fn pop_read_result(&self, out: &mut [u8]) -> ReadResult {
        let Ok(mut pipe) = self.read.lock() else {
            return ReadResult::of(OpStatus::InvalidFile);
        };
        if !self.dev.is_open() {
            return ReadResult::of(OpStatus::InvalidFile);
        }
        pipe.take_result(out)
    }

    pub fn write(&self, data: &[u8]) -> OpResult {
        match self.write.lock() {
            Ok(mut pipe) => pipe.write(data),
            Err(_) => OpResult::of(OpStatus::InvalidFile),
        }
    }

    pub fn write_sync(&self, data: &[u8], timeout: Duration) -> OpResult {
        match self.write.lock() {
            Ok(mut pipe) => pipe.write_sync(data, timeout),
            Err(_) => OpResult::of(OpStatus::InvalidFile),
        }
    }

    pub fn sync_read(&self, timeout: Duration) -> OpStatus {
        self.read
            .lock()
            .map_or(OpStatus::InvalidFile, |pipe| pipe.sync(timeout))
    }

    pub fn sync_write(&self, timeout: Duration) -> OpStatus {
        self.write
            .lock()
            .map_or(OpStatus::InvalidFile, |pipe| pipe.sync(timeout))
    }

    /// Waits for the read and then the write within one shared budget.
    ///
    /// The write wait receives whatever remains of `timeout` after the read
    /// completed; a budget fully consumed by the read (including overhead
    /// pushing the elapsed time past it) reports `StillExecuting` without
    /// touching the write side. With [`SYNC_INFINITE`] the remainder
    /// arithmetic has no meaning and the write side is not waited on.
    pub fn sync_all(&self, timeout: Duration) -> OpStatus {
        let timer = crate::timer::ElapsedTimer::start();
        let read_status = self.sync_read(timeout);
        if read_status != OpStatus::Success {
            return read_status;
        }
        let elapsed = timer.elapsed();
        if timeout > elapsed {
            self.sync_write(timeout - elapsed)
        } else {
            OpStatus::StillExecuting
        }
    }

    pub fn cancel_read(&self) {
        if let Ok(pipe) = self.read.lock() {
            pipe.cancel();
        }
    }

    /// Closes the device handle. Both pipes observe the closure and every
    /// subsequent operation reports `InvalidFile`.
    pub fn close(&self) {
        // Hold whichever sides are still healthy out of the way while the
        // handle goes down.
        let _read = self.read.lock();
        let _write = self.write.lock();
        self.dev.close();
    }
}
