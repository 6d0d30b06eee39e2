//! Raw device access — trait + Windows overlapped backend + test mock.
//!
//! [`RawDevice`] is the seam between the pipe layer and the operating
//! system: one asynchronous read and one asynchronous write slot over a
//! single HID handle. The Windows backend drives real overlapped I/O; the
//! in-memory mock scripts device behaviour for tests.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// Win32 error codes surfaced through the trait. The mock reports the same
// values so diagnostics read identically on every backend.
pub(crate) const ERR_INVALID_HANDLE: u32 = 6;
pub(crate) const ERR_OPERATION_ABORTED: u32 = 995;
pub(crate) const ERR_IO_INCOMPLETE: u32 = 996;

// ── Error type ──

/// Device discovery and open errors.
#[derive(Debug)]
pub enum DeviceError {
    /// No present HID interface matches the Pro controller signature.
    NotFound,
    OpenFailed(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NotFound => write!(f, "Pro controller not found"),
            DeviceError::OpenFailed(e) => write!(f, "Failed to open device: {e}"),
        }
    }
}

impl std::error::Error for DeviceError {}

pub type Result<T> = std::result::Result<T, DeviceError>;

// ── Trait ──

/// Transfer direction of an asynchronous operation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDir {
    Read,
    Write,
}

/// Outcome of waiting on a transfer's completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
    /// The wait itself failed; carries the OS error code.
    Failed(u32),
}

/// One duplex asynchronous packet endpoint.
///
/// At most one transfer may be outstanding per direction; callers gate on
/// [`RawDevice::is_executing`] before submitting. Submission never blocks.
/// Completion is level-triggered: once a transfer finishes,
/// `is_executing` reports `false` until the next submission, and a read's
/// bytes stay retrievable through [`RawDevice::read_result`].
///
/// Closing while a transfer is in flight cancels it; the next status check
/// on that slot reports an error. This is an expected path, not a bug.
pub trait RawDevice: Send + Sync {
    /// Submits an asynchronous read of up to `len` bytes into the slot's
    /// staging buffer. `Err` carries the OS error code.
    fn begin_read(&self, len: usize) -> std::result::Result<(), u32>;

    /// Submits an asynchronous write of `data`. The slot stages its own
    /// copy; `data` need not outlive the call.
    fn begin_write(&self, data: &[u8]) -> std::result::Result<(), u32>;

    /// Whether the direction's slot has a transfer the kernel has not yet
    /// completed.
    fn is_executing(&self, dir: TransferDir) -> bool;

    /// Blocks until the direction's completion event fires. `None` waits
    /// indefinitely.
    fn wait(&self, dir: TransferDir, timeout: Option<Duration>) -> WaitOutcome;

    /// Retrieves a completed read: copies up to `out.len()` bytes and
    /// returns the kernel byte count. With no completed read pending this
    /// reports `Ok(0)` (the slot's initial zeroed completion state).
    fn read_result(&self, out: &mut [u8]) -> std::result::Result<u32, u32>;

    /// Cancels the direction's outstanding transfer, if any. No-op on an
    /// idle slot.
    fn cancel(&self, dir: TransferDir);

    fn is_open(&self) -> bool;

    /// Closes the underlying handle. Outstanding transfers are cancelled
    /// and drained first; every subsequent submission fails.
    fn close(&self);
}

/// A permanently closed placeholder endpoint.
///
/// Stands in for "no controller attached" so the pipe aggregate never deals
/// in optional devices — every operation fails the same way it would on a
/// closed handle.
struct Detached;

impl RawDevice for Detached {
    fn begin_read(&self, _len: usize) -> std::result::Result<(), u32> {
        Err(ERR_INVALID_HANDLE)
    }

    fn begin_write(&self, _data: &[u8]) -> std::result::Result<(), u32> {
        Err(ERR_INVALID_HANDLE)
    }

    fn is_executing(&self, _dir: TransferDir) -> bool {
        false
    }

    fn wait(&self, _dir: TransferDir, _timeout: Option<Duration>) -> WaitOutcome {
        WaitOutcome::Failed(ERR_INVALID_HANDLE)
    }

    fn read_result(&self, _out: &mut [u8]) -> std::result::Result<u32, u32> {
        Err(ERR_INVALID_HANDLE)
    }

    fn cancel(&self, _dir: TransferDir) {}

    fn is_open(&self) -> bool {
        false
    }

    fn close(&self) {}
}

/// Returns the shared "no device" endpoint.
pub fn detached() -> Arc<dyn RawDevice> {
    Arc::new(Detached)
}

// ── Windows implementation ──

/// Interface-path fragment identifying the Pro controller in USB mode
/// (VID 0x057E, PID 0x2009). Matched case-insensitively.
pub const DEVICE_PATH_TAG: &str = "hid#vid_057e&pid_2009";

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use std::mem;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicIsize, Ordering};

    use windows::Win32::Devices::DeviceAndDriverInstallation::*;
    use windows::Win32::Devices::HumanInterfaceDevice::GUID_DEVINTERFACE_HID;
    use windows::Win32::Foundation::{
        CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE, STATUS_PENDING,
    };
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, FILE_FLAG_OVERLAPPED, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
        ReadFile, WriteFile,
    };
    use windows::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};
    use windows::Win32::System::Threading::{CreateEventW, INFINITE, WaitForSingleObject};
    use windows::core::PCWSTR;

    /// HRESULT wrapping of ERROR_IO_PENDING.
    const E_IO_PENDING: u32 = 0x8007_03E5;

    /// Per-direction overlapped state. The staging buffer and OVERLAPPED
    /// block must not move or be resized while a transfer is in flight; the
    /// kernel writes to both asynchronously.
    struct TransferSlot {
        overlapped: Box<OVERLAPPED>,
        event: HANDLE,
        staging: Vec<u8>,
    }

    impl TransferSlot {
        fn new() -> std::result::Result<Self, String> {
            // Auto-reset, initially unsignalled. ReadFile/WriteFile clear
            // the event again when a new transfer starts.
            let event = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }
                .map_err(|e| format!("CreateEvent: {e}"))?;
            let mut overlapped: Box<OVERLAPPED> = Box::new(unsafe { mem::zeroed() });
            overlapped.hEvent = event;
            Ok(TransferSlot { overlapped, event, staging: Vec::new() })
        }

        fn in_flight(&self) -> bool {
            self.overlapped.Internal == STATUS_PENDING.0 as usize
        }

        fn rearm(&mut self) {
            *self.overlapped = unsafe { mem::zeroed() };
            self.overlapped.hEvent = self.event;
        }
    }

    pub struct ProUsbDevice {
        /// Raw HANDLE value; INVALID_HANDLE_VALUE once closed.
        handle: AtomicIsize,
        read_op: Mutex<TransferSlot>,
        write_op: Mutex<TransferSlot>,
    }

    // The raw pointers inside OVERLAPPED are only touched under the slot
    // mutexes, and the handle is an atomic word.
    unsafe impl Send for ProUsbDevice {}
    unsafe impl Sync for ProUsbDevice {}

    impl ProUsbDevice {
        fn from_handle(handle: HANDLE) -> std::result::Result<Self, String> {
            Ok(ProUsbDevice {
                handle: AtomicIsize::new(handle.0 as isize),
                read_op: Mutex::new(TransferSlot::new()?),
                write_op: Mutex::new(TransferSlot::new()?),
            })
        }

        fn raw_handle(&self) -> HANDLE {
            HANDLE(self.handle.load(Ordering::Acquire) as *mut _)
        }

        fn slot(&self, dir: TransferDir) -> &Mutex<TransferSlot> {
            match dir {
                TransferDir::Read => &self.read_op,
                TransferDir::Write => &self.write_op,
            }
        }

        /// Cancels and drains the slot's outstanding transfer so the kernel
        /// is done with the staging buffer before it can be freed or the
        /// handle closed.
        fn drain(&self, handle: HANDLE, slot: &mut TransferSlot) {
            if slot.in_flight() {
                unsafe {
                    let _ = CancelIoEx(handle, Some(&*slot.overlapped));
                    let mut bytes = 0u32;
                    let _ = GetOverlappedResult(handle, &*slot.overlapped, &mut bytes, true);
                }
            }
        }
    }

    impl RawDevice for ProUsbDevice {
        fn begin_read(&self, len: usize) -> std::result::Result<(), u32> {
            let handle = self.raw_handle();
            let Ok(mut slot) = self.read_op.lock() else {
                return Err(ERR_INVALID_HANDLE);
            };
            if slot.in_flight() {
                return Err(ERR_IO_INCOMPLETE);
            }
            slot.staging.resize(len, 0);
            slot.rearm();
            let ov: *mut OVERLAPPED = &mut *slot.overlapped;
            match unsafe { ReadFile(handle, Some(&mut slot.staging[..]), None, Some(ov)) } {
                Ok(()) => Ok(()),
                Err(e) if e.code().0 as u32 == E_IO_PENDING => Ok(()),
                Err(e) => {
                    // Submission failed; scrub the pending flag so the slot
                    // stays usable.
                    slot.overlapped.Internal = 0;
                    Err(e.code().0 as u32)
                }
            }
        }

        fn begin_write(&self, data: &[u8]) -> std::result::Result<(), u32> {
            let handle = self.raw_handle();
            let Ok(mut slot) = self.write_op.lock() else {
                return Err(ERR_INVALID_HANDLE);
            };
            if slot.in_flight() {
                return Err(ERR_IO_INCOMPLETE);
            }
            slot.staging.clear();
            slot.staging.extend_from_slice(data);
            slot.rearm();
            let ov: *mut OVERLAPPED = &mut *slot.overlapped;
            match unsafe { WriteFile(handle, Some(&slot.staging[..]), None, Some(ov)) } {
                Ok(()) => Ok(()),
                Err(e) if e.code().0 as u32 == E_IO_PENDING => Ok(()),
                Err(e) => {
                    slot.overlapped.Internal = 0;
                    Err(e.code().0 as u32)
                }
            }
        }

        fn is_executing(&self, dir: TransferDir) -> bool {
            self.slot(dir).lock().map(|slot| slot.in_flight()).unwrap_or(false)
        }

        fn wait(&self, dir: TransferDir, timeout: Option<Duration>) -> WaitOutcome {
            let event = {
                let Ok(slot) = self.slot(dir).lock() else {
                    return WaitOutcome::Failed(ERR_INVALID_HANDLE);
                };
                if !slot.in_flight() {
                    return WaitOutcome::Completed;
                }
                slot.event
            };
            let millis = timeout.map_or(INFINITE, |t| t.as_millis().min(u128::from(u32::MAX)) as u32);
            let wait = unsafe { WaitForSingleObject(event, millis) };
            match wait.0 {
                0 => WaitOutcome::Completed,      // WAIT_OBJECT_0
                0x102 => WaitOutcome::TimedOut,   // WAIT_TIMEOUT
                code => WaitOutcome::Failed(code),
            }
        }

        fn read_result(&self, out: &mut [u8]) -> std::result::Result<u32, u32> {
            let handle = self.raw_handle();
            let Ok(slot) = self.read_op.lock() else {
                return Err(ERR_INVALID_HANDLE);
            };
            let mut bytes = 0u32;
            match unsafe { GetOverlappedResult(handle, &*slot.overlapped, &mut bytes, false) } {
                Ok(()) => {
                    let n = (bytes as usize).min(out.len()).min(slot.staging.len());
                    out[..n].copy_from_slice(&slot.staging[..n]);
                    Ok(bytes)
                }
                Err(e) => Err(e.code().0 as u32),
            }
        }

        fn cancel(&self, dir: TransferDir) {
            let handle = self.raw_handle();
            // Drain as well as cancel: the staging buffer belongs to the
            // kernel until the cancelled transfer actually completes.
            if let Ok(mut slot) = self.slot(dir).lock() {
                self.drain(handle, &mut slot);
            }
        }

        fn is_open(&self) -> bool {
            let raw = self.handle.load(Ordering::Acquire);
            raw != 0 && raw != INVALID_HANDLE_VALUE.0 as isize
        }

        fn close(&self) {
            let raw = self
                .handle
                .swap(INVALID_HANDLE_VALUE.0 as isize, Ordering::AcqRel);
            let handle = HANDLE(raw as *mut _);
            if raw == 0 || raw == INVALID_HANDLE_VALUE.0 as isize {
                return;
            }
            if let Ok(mut read) = self.read_op.lock() {
                self.drain(handle, &mut read);
            }
            if let Ok(mut write) = self.write_op.lock() {
                self.drain(handle, &mut write);
            }
            unsafe {
                let _ = CloseHandle(handle);
            }
        }
    }

    impl Drop for ProUsbDevice {
        fn drop(&mut self) {
            self.close();
            for slot in [&mut self.read_op, &mut self.write_op] {
                // Free the event even if a panicking thread poisoned the slot.
                let slot = slot.get_mut().unwrap_or_else(|e| e.into_inner());
                unsafe {
                    let _ = CloseHandle(slot.event);
                }
            }
        }
    }

    /// Finds the interface path of the first present HID device whose path
    /// contains [`DEVICE_PATH_TAG`].
    pub fn find_device_path() -> Option<String> {
        unsafe {
            let dev_info = SetupDiGetClassDevsW(
                Some(&GUID_DEVINTERFACE_HID),
                PCWSTR::null(),
                None,
                DIGCF_PRESENT | DIGCF_DEVICEINTERFACE,
            )
            .ok()?;
            let result = find_device_path_inner(dev_info);
            let _ = SetupDiDestroyDeviceInfoList(dev_info);
            result
        }
    }

    unsafe fn find_device_path_inner(dev_info: HDEVINFO) -> Option<String> {
        for index in 0..256 {
            let mut iface = SP_DEVICE_INTERFACE_DATA {
                cbSize: mem::size_of::<SP_DEVICE_INTERFACE_DATA>() as u32,
                ..Default::default()
            };
            // SAFETY: dev_info is a valid handle from SetupDiGetClassDevsW;
            // iface is properly sized and initialized above.
            if unsafe {
                SetupDiEnumDeviceInterfaces(dev_info, None, &GUID_DEVINTERFACE_HID, index, &mut iface)
            }
            .is_err()
            {
                break;
            }
            let mut req: u32 = 0;
            // SAFETY: first call with NULL buffer to query required size.
            let _ = unsafe {
                SetupDiGetDeviceInterfaceDetailW(dev_info, &iface, None, 0, Some(&mut req), None)
            };
            if req == 0 {
                continue;
            }
            // Back the detail struct with u32 storage so its header (and the
            // UTF-16 path behind it) are properly aligned.
            let mut buf = vec![0u32; (req as usize).div_ceil(4)];
            // SAFETY: buf spans req bytes, large enough for the detail struct.
            let detail =
                unsafe { &mut *(buf.as_mut_ptr() as *mut SP_DEVICE_INTERFACE_DETAIL_DATA_W) };
            detail.cbSize = mem::size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>() as u32;
            // SAFETY: detail is properly sized (req bytes) and cbSize is set.
            if unsafe {
                SetupDiGetDeviceInterfaceDetailW(dev_info, &iface, Some(detail), req, None, None)
            }
            .is_ok()
            {
                // DevicePath is an inline, null-terminated UTF-16 string
                // occupying the remainder of the reported size. View that
                // whole region and cut at the terminator.
                let head = mem::offset_of!(SP_DEVICE_INTERFACE_DETAIL_DATA_W, DevicePath);
                let units = (req as usize).saturating_sub(head) / 2;
                // SAFETY: the detail call filled buf; the region past the
                // header holds `units` u16 code units at a 2-aligned offset.
                let wide = unsafe {
                    let start = (buf.as_ptr() as *const u8).add(head) as *const u16;
                    std::slice::from_raw_parts(start, units)
                };
                let terminated = wide.split(|&unit| unit == 0).next().unwrap_or(wide);
                let path = String::from_utf16_lossy(terminated);
                if path.to_lowercase().contains(DEVICE_PATH_TAG) {
                    return Some(path);
                }
            }
        }
        None
    }

    /// Opens the first present Pro controller interface for overlapped I/O.
    pub fn open_pro_controller() -> Result<Arc<dyn RawDevice>> {
        let path = find_device_path().ok_or(DeviceError::NotFound)?;
        log::debug!("opening {path}");

        let wide: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();
        // Shared read+write: the HID class driver keeps its own open.
        let handle = unsafe {
            CreateFileW(
                PCWSTR(wide.as_ptr()),
                (GENERIC_READ | GENERIC_WRITE).0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                FILE_FLAG_OVERLAPPED,
                None,
            )
        }
        .map_err(|e| DeviceError::OpenFailed(format!("CreateFileW: {e}")))?;

        match ProUsbDevice::from_handle(handle) {
            Ok(dev) => Ok(Arc::new(dev)),
            Err(e) => {
                unsafe {
                    let _ = CloseHandle(handle);
                }
                Err(DeviceError::OpenFailed(e))
            }
        }
    }
}

#[cfg(windows)]
pub use windows_impl::{ProUsbDevice, find_device_path, open_pro_controller};

// ── Mock device for testing ──

/// In-memory scripted device for unit and integration tests.
///
/// Always compiled (zero runtime cost), hidden from public docs.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Condvar, Mutex};

    /// Hook invoked with every written report; the buffers it returns are
    /// delivered as future read completions.
    pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

    enum ReadOp {
        Idle,
        Pending { len: usize },
        Done { data: Vec<u8> },
    }

    struct MockState {
        read: ReadOp,
        queued: VecDeque<Vec<u8>>,
        writes: Vec<Vec<u8>>,
        responder: Option<Responder>,
        aborted: bool,
        fail_reads: bool,
        fail_writes: bool,
    }

    /// Scripted [`RawDevice`]: writes complete instantly, reads complete
    /// from a queue of prepared buffers (or block until one arrives).
    pub struct MockDevice {
        state: Mutex<MockState>,
        completion: Condvar,
        open: AtomicBool,
    }

    impl Default for MockDevice {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockDevice {
        pub fn new() -> Self {
            MockDevice {
                state: Mutex::new(MockState {
                    read: ReadOp::Idle,
                    queued: VecDeque::new(),
                    writes: Vec::new(),
                    responder: None,
                    aborted: false,
                    fail_reads: false,
                    fail_writes: false,
                }),
                completion: Condvar::new(),
                open: AtomicBool::new(true),
            }
        }

        /// Installs the write hook driving scripted replies.
        pub fn set_responder(&self, responder: Responder) {
            self.state.lock().unwrap().responder = Some(responder);
        }

        /// Queues a buffer that the current or a future read completes with.
        pub fn push_read(&self, data: Vec<u8>) {
            let mut state = self.state.lock().unwrap();
            Self::deliver(&mut state, data);
            self.completion.notify_all();
        }

        /// Reports written so far, in order.
        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.state.lock().unwrap().writes.clone()
        }

        /// Makes subsequent read submissions fail at the OS layer.
        pub fn fail_reads(&self, fail: bool) {
            self.state.lock().unwrap().fail_reads = fail;
        }

        /// Makes subsequent write submissions fail at the OS layer.
        pub fn fail_writes(&self, fail: bool) {
            self.state.lock().unwrap().fail_writes = fail;
        }

        fn deliver(state: &mut MockState, mut data: Vec<u8>) {
            if let ReadOp::Pending { len } = state.read {
                data.truncate(len);
                state.read = ReadOp::Done { data };
            } else {
                state.queued.push_back(data);
            }
        }
    }

    impl RawDevice for MockDevice {
        fn begin_read(&self, len: usize) -> std::result::Result<(), u32> {
            if !self.is_open() {
                return Err(ERR_INVALID_HANDLE);
            }
            let mut state = self.state.lock().unwrap();
            if state.fail_reads {
                return Err(ERR_INVALID_HANDLE);
            }
            if matches!(state.read, ReadOp::Pending { .. }) {
                return Err(ERR_IO_INCOMPLETE);
            }
            state.aborted = false;
            state.read = match state.queued.pop_front() {
                Some(mut data) => {
                    data.truncate(len);
                    ReadOp::Done { data }
                }
                None => ReadOp::Pending { len },
            };
            Ok(())
        }

        fn begin_write(&self, data: &[u8]) -> std::result::Result<(), u32> {
            if !self.is_open() {
                return Err(ERR_INVALID_HANDLE);
            }
            let mut state = self.state.lock().unwrap();
            if state.fail_writes {
                return Err(ERR_INVALID_HANDLE);
            }
            state.writes.push(data.to_vec());
            // Feed the responder outside the struct to keep the borrow simple.
            let mut responder = state.responder.take();
            if let Some(hook) = responder.as_mut() {
                for reply in hook(data) {
                    Self::deliver(&mut state, reply);
                }
            }
            state.responder = responder;
            drop(state);
            self.completion.notify_all();
            Ok(())
        }

        fn is_executing(&self, dir: TransferDir) -> bool {
            match dir {
                TransferDir::Read => {
                    matches!(self.state.lock().unwrap().read, ReadOp::Pending { .. })
                }
                // Writes complete at submission.
                TransferDir::Write => false,
            }
        }

        fn wait(&self, dir: TransferDir, timeout: Option<Duration>) -> WaitOutcome {
            if dir == TransferDir::Write {
                return WaitOutcome::Completed;
            }
            let deadline = timeout.map(|t| std::time::Instant::now() + t);
            let mut state = self.state.lock().unwrap();
            loop {
                if !matches!(state.read, ReadOp::Pending { .. }) {
                    return WaitOutcome::Completed;
                }
                match deadline {
                    Some(d) => {
                        let now = std::time::Instant::now();
                        if now >= d {
                            return WaitOutcome::TimedOut;
                        }
                        let (guard, _) = self
                            .completion
                            .wait_timeout(state, d - now)
                            .unwrap();
                        state = guard;
                    }
                    None => {
                        state = self.completion.wait(state).unwrap();
                    }
                }
            }
        }

        fn read_result(&self, out: &mut [u8]) -> std::result::Result<u32, u32> {
            if !self.is_open() {
                return Err(ERR_INVALID_HANDLE);
            }
            let mut state = self.state.lock().unwrap();
            if state.aborted {
                state.aborted = false;
                return Err(ERR_OPERATION_ABORTED);
            }
            match std::mem::replace(&mut state.read, ReadOp::Idle) {
                ReadOp::Idle => Ok(0),
                ReadOp::Pending { len } => {
                    state.read = ReadOp::Pending { len };
                    Err(ERR_IO_INCOMPLETE)
                }
                ReadOp::Done { data } => {
                    let n = data.len().min(out.len());
                    out[..n].copy_from_slice(&data[..n]);
                    Ok(data.len() as u32)
                }
            }
        }

        fn cancel(&self, dir: TransferDir) {
            if dir == TransferDir::Write {
                return;
            }
            let mut state = self.state.lock().unwrap();
            if matches!(state.read, ReadOp::Pending { .. }) {
                state.read = ReadOp::Idle;
                state.aborted = true;
                drop(state);
                self.completion.notify_all();
            }
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::Acquire)
        }

        fn close(&self) {
            self.open.store(false, Ordering::Release);
            let mut state = self.state.lock().unwrap();
            if matches!(state.read, ReadOp::Pending { .. }) {
                state.read = ReadOp::Idle;
                state.aborted = true;
            }
            drop(state);
            self.completion.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockDevice;
    use super::*;

    #[test]
    fn detached_device_fails_everything() {
        let dev = detached();
        assert!(!dev.is_open());
        assert_eq!(dev.begin_read(64), Err(ERR_INVALID_HANDLE));
        assert_eq!(dev.begin_write(&[0u8; 64]), Err(ERR_INVALID_HANDLE));
        assert!(!dev.is_executing(TransferDir::Read));
        assert_eq!(
            dev.wait(TransferDir::Read, None),
            WaitOutcome::Failed(ERR_INVALID_HANDLE)
        );
    }

    #[test]
    fn mock_read_completes_from_queue() {
        let dev = MockDevice::new();
        dev.push_read(vec![0x30, 0x01]);
        dev.begin_read(64).unwrap();
        assert!(!dev.is_executing(TransferDir::Read));
        let mut out = [0u8; 64];
        assert_eq!(dev.read_result(&mut out), Ok(2));
        assert_eq!(&out[..2], &[0x30, 0x01]);
    }

    #[test]
    fn mock_pending_read_completes_on_push() {
        let dev = std::sync::Arc::new(MockDevice::new());
        dev.begin_read(64).unwrap();
        assert!(dev.is_executing(TransferDir::Read));

        let pusher = std::sync::Arc::clone(&dev);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            pusher.push_read(vec![0x30]);
        });
        assert_eq!(
            dev.wait(TransferDir::Read, Some(Duration::from_millis(500))),
            WaitOutcome::Completed
        );
        handle.join().unwrap();
        let mut out = [0u8; 64];
        assert_eq!(dev.read_result(&mut out), Ok(1));
    }

    #[test]
    fn mock_pending_read_times_out() {
        let dev = MockDevice::new();
        dev.begin_read(64).unwrap();
        assert_eq!(
            dev.wait(TransferDir::Read, Some(Duration::from_millis(20))),
            WaitOutcome::TimedOut
        );
        assert!(dev.is_executing(TransferDir::Read));
    }

    #[test]
    fn mock_cancel_aborts_pending_read() {
        let dev = MockDevice::new();
        dev.begin_read(64).unwrap();
        dev.cancel(TransferDir::Read);
        assert!(!dev.is_executing(TransferDir::Read));
        let mut out = [0u8; 64];
        assert_eq!(dev.read_result(&mut out), Err(ERR_OPERATION_ABORTED));
        // The aborted flag is one-shot.
        assert_eq!(dev.read_result(&mut out), Ok(0));
    }

    #[test]
    fn mock_idle_result_is_zero_bytes() {
        let dev = MockDevice::new();
        let mut out = [0u8; 64];
        assert_eq!(dev.read_result(&mut out), Ok(0));
    }

    #[test]
    fn mock_close_fails_later_operations() {
        let dev = MockDevice::new();
        dev.begin_read(64).unwrap();
        dev.close();
        assert!(!dev.is_open());
        let mut out = [0u8; 64];
        assert_eq!(dev.read_result(&mut out), Err(ERR_INVALID_HANDLE));
        assert_eq!(dev.begin_read(64), Err(ERR_INVALID_HANDLE));
    }

    #[test]
    fn mock_responder_replies_to_writes() {
        let dev = MockDevice::new();
        dev.set_responder(Box::new(|written: &[u8]| {
            if written[0] == 0x80 {
                vec![vec![0x81, written[1]]]
            } else {
                Vec::new()
            }
        }));
        dev.begin_write(&[0x80, 0x02]).unwrap();
        dev.begin_read(64).unwrap();
        let mut out = [0u8; 64];
        assert_eq!(dev.read_result(&mut out), Ok(2));
        assert_eq!(&out[..2], &[0x81, 0x02]);
        assert_eq!(dev.writes().len(), 1);
    }
}
