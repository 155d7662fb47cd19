//! Shared-state publisher.
//!
//! Exposes the current/next track and playback timing to other processes through
//! a System V shared memory segment laid out per [`tunebar_types::shm`]. There is
//! exactly one writer and no locking; every update overwrites whole fields and
//! then refreshes the segment's change time so readers can tell it is alive.
//!
//! When the segment cannot be created (or another live process owns it) the
//! publisher is disabled and every publish call is a no-op.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tunebar_types::shm::{self, CURRENT_TRACK, Field, NEXT_TRACK, SHM_LEN, SegmentSnapshot};
use tunebar_types::{PlaybackStatus, PlaybackTrack};

use crate::error::ShmError;

/// Backing storage of the shared record.
pub trait Segment {
    fn bytes(&self) -> &[u8];
    fn bytes_mut(&mut self) -> &mut [u8];
    /// Refresh the segment's metadata timestamp.
    fn touch(&mut self) -> Result<(), ShmError>;
}

/// In-process segment; counts touches instead of updating a kernel timestamp.
pub struct HeapSegment {
    buf: Vec<u8>,
    touches: Arc<AtomicU64>,
}

impl Default for HeapSegment {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapSegment {
    pub fn new() -> Self {
        Self {
            buf: vec![0; SHM_LEN],
            touches: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter incremented on every touch; stays valid after the segment is boxed.
    pub fn touch_counter(&self) -> Arc<AtomicU64> {
        self.touches.clone()
    }
}

impl Segment for HeapSegment {
    fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    fn touch(&mut self) -> Result<(), ShmError> {
        self.touches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn segment_key(key_path: &Path) -> Result<libc::key_t, ShmError> {
    let c_path = CString::new(key_path.as_os_str().as_bytes())
        .map_err(|_| ShmError::KeyPath(key_path.display().to_string()))?;
    let key = unsafe { libc::ftok(c_path.as_ptr(), 1) };
    if key == -1 {
        return Err(ShmError::Key(std::io::Error::last_os_error()));
    }
    Ok(key)
}

fn segment_stat(id: libc::c_int) -> Result<libc::shmid_ds, ShmError> {
    let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
    if unsafe { libc::shmctl(id, libc::IPC_STAT, &mut ds) } < 0 {
        return Err(ShmError::last_os("shmctl(IPC_STAT)"));
    }
    Ok(ds)
}

fn create_exclusive(key: libc::key_t) -> libc::c_int {
    unsafe { libc::shmget(key, SHM_LEN, 0o644 | libc::IPC_CREAT | libc::IPC_EXCL) }
}

fn attach(id: libc::c_int, flags: libc::c_int) -> Result<*mut u8, ShmError> {
    let addr = unsafe { libc::shmat(id, std::ptr::null(), flags) };
    if addr as isize == -1 {
        return Err(ShmError::last_os("shmat"));
    }
    Ok(addr.cast())
}

/// System V shared memory segment attached read/write by the publisher.
pub struct SysvSegment {
    id: libc::c_int,
    addr: *mut u8,
}

impl SysvSegment {
    /// Create the segment keyed by `key_path`, replacing a stale one.
    ///
    /// An existing segment that is still attached elsewhere is left alone and
    /// reported as [`ShmError::Busy`].
    pub fn create(key_path: &Path) -> Result<Self, ShmError> {
        let key = segment_key(key_path)?;
        let mut id = create_exclusive(key);
        if id < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(ShmError::Sys {
                    op: "shmget",
                    source: err,
                });
            }
            let existing = unsafe { libc::shmget(key, 0, 0) };
            if existing < 0 {
                return Err(ShmError::last_os("shmget(existing)"));
            }
            let attached = segment_stat(existing)?.shm_nattch as u64;
            if attached > 0 {
                return Err(ShmError::Busy(attached));
            }
            tracing::info!(key, "removing stale shared-state segment");
            if unsafe { libc::shmctl(existing, libc::IPC_RMID, std::ptr::null_mut()) } < 0 {
                return Err(ShmError::last_os("shmctl(IPC_RMID)"));
            }
            id = create_exclusive(key);
            if id < 0 {
                return Err(ShmError::last_os("shmget(recreate)"));
            }
        }
        let addr = attach(id, 0)?;
        Ok(Self { id, addr })
    }

    pub fn id(&self) -> libc::c_int {
        self.id
    }
}

impl Segment for SysvSegment {
    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.addr, SHM_LEN) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.addr, SHM_LEN) }
    }

    fn touch(&mut self) -> Result<(), ShmError> {
        let mut ds = segment_stat(self.id)?;
        if unsafe { libc::shmctl(self.id, libc::IPC_SET, &mut ds) } < 0 {
            return Err(ShmError::last_os("shmctl(IPC_SET)"));
        }
        Ok(())
    }
}

impl Drop for SysvSegment {
    fn drop(&mut self) {
        unsafe {
            libc::shmdt(self.addr.cast());
        }
    }
}

/// Attach read-only to the segment keyed by `key_path` and decode it.
pub fn read_snapshot(key_path: &Path) -> Result<SegmentSnapshot, ShmError> {
    let key = segment_key(key_path)?;
    let id = unsafe { libc::shmget(key, 0, 0) };
    if id < 0 {
        return Err(ShmError::last_os("shmget"));
    }
    let size = segment_stat(id)?.shm_segsz as usize;
    if size < SHM_LEN {
        return Err(shm::LayoutError::Truncated(size).into());
    }
    let addr = attach(id, libc::SHM_RDONLY)?;
    let copy = unsafe { std::slice::from_raw_parts(addr, SHM_LEN) }.to_vec();
    unsafe {
        libc::shmdt(addr.cast());
    }
    Ok(SegmentSnapshot::parse(&copy)?)
}

/// Track data for one full publish.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackSnapshot {
    pub station_name: String,
    pub current: Option<PlaybackTrack>,
    pub next: Option<PlaybackTrack>,
}

/// Single writer of the shared record.
pub struct Publisher {
    segment: Option<Box<dyn Segment>>,
}

impl Publisher {
    /// Create the System V segment for `key_path`; failures disable publishing.
    pub fn init(key_path: &Path) -> Self {
        match SysvSegment::create(key_path) {
            Ok(segment) => {
                tracing::info!(id = segment.id(), path = %key_path.display(), "shared state segment ready");
                Self::with_segment(Box::new(segment))
            }
            Err(e) => {
                tracing::warn!(path = %key_path.display(), "shared state publishing disabled: {e}");
                Self::disabled()
            }
        }
    }

    /// Publish into `segment`, resetting it to an empty record first.
    pub fn with_segment(mut segment: Box<dyn Segment>) -> Self {
        shm::initialize(segment.bytes_mut());
        Self {
            segment: Some(segment),
        }
    }

    pub fn disabled() -> Self {
        Self { segment: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.segment.is_some()
    }

    /// Raw record bytes, if publishing is enabled.
    pub fn bytes(&self) -> Option<&[u8]> {
        self.segment.as_deref().map(|s| s.bytes())
    }

    /// Decode the record as an external reader would.
    pub fn snapshot(&self) -> Option<SegmentSnapshot> {
        self.bytes().and_then(|b| SegmentSnapshot::parse(b).ok())
    }

    /// Overwrite the station name and both track slots.
    pub fn publish(&mut self, snapshot: &TrackSnapshot) {
        let Some(segment) = self.segment.as_deref_mut() else {
            return;
        };
        let buf = segment.bytes_mut();
        shm::write_text(buf, Field::StationName, &snapshot.station_name);
        let empty = PlaybackTrack::default();
        shm::write_track(buf, &CURRENT_TRACK, snapshot.current.as_ref().unwrap_or(&empty));
        shm::write_track(buf, &NEXT_TRACK, snapshot.next.as_ref().unwrap_or(&empty));
        touch(segment);
    }

    /// Overwrite only the current track's timing.
    pub fn publish_timing(&mut self, duration_secs: u32, played_secs: u32) {
        let Some(segment) = self.segment.as_deref_mut() else {
            return;
        };
        let buf = segment.bytes_mut();
        shm::write_u32(buf, Field::CurrentDuration, duration_secs);
        shm::write_u32(buf, Field::CurrentPlayed, played_secs);
        touch(segment);
    }

    pub fn publish_status(&mut self, status: PlaybackStatus) {
        let Some(segment) = self.segment.as_deref_mut() else {
            return;
        };
        shm::write_u32(segment.bytes_mut(), Field::Status, status.as_u32());
        touch(segment);
    }
}

fn touch(segment: &mut dyn Segment) {
    if let Err(e) = segment.touch() {
        tracing::debug!("shared state touch failed: {e}");
    }
}
