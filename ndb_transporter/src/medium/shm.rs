//! System V shared memory medium
//!
//! One segment holds both ring regions back to back. The creator (lower
//! node id) produces into region 0, the attacher into region 1. Peer
//! presence is the kernel's attach count on the segment.

use super::{LinkMedium, MediumResult};
use crate::ring::RingChannel;
use ndb_common::error::TransporterError;
use ndb_common::link::{LinkRole, TransporterConfig};
use nix::errno::Errno;
use std::ptr::NonNull;
use tracing::{debug, warn};

/// Shared memory link state.
pub struct ShmLink {
    key: i32,
    role: LinkRole,
    capacity: u32,
    slack: u32,
    segment_size: usize,
    shmid: Option<i32>,
    base: Option<NonNull<u8>>,
    send: Option<RingChannel>,
    recv: Option<RingChannel>,
}

// SAFETY: the mapping is owned by this link until `release`.
unsafe impl Send for ShmLink {}

impl ShmLink {
    /// Link over the segment identified by `key`.
    pub fn new(config: &TransporterConfig, key: i32) -> Self {
        Self {
            key,
            role: config.role(),
            capacity: config.capacity,
            slack: config.slack(),
            segment_size: config.segment_size(),
            shmid: None,
            base: None,
            send: None,
            recv: None,
        }
    }

    /// IPC key of the segment.
    pub fn key(&self) -> i32 {
        self.key
    }

    fn region(&self, index: usize) -> Option<*mut u8> {
        let offset = index * RingChannel::region_size(self.capacity, self.slack);
        // SAFETY: both regions lie inside the `segment_size` mapping.
        self.base.map(|base| unsafe { base.as_ptr().add(offset) })
    }

    /// Views over both regions, produced-into region first.
    fn region_views(&self) -> Option<(RingChannel, RingChannel)> {
        let (own, peer) = match self.role {
            LinkRole::Creator => (self.region(0)?, self.region(1)?),
            LinkRole::Attacher => (self.region(1)?, self.region(0)?),
        };
        // SAFETY: regions are 4-byte aligned (shmat returns page-aligned
        // memory, region size is a multiple of 4) and mapped until release.
        unsafe {
            Some((
                RingChannel::over_raw(own, self.capacity, self.slack).ok()?,
                RingChannel::over_raw(peer, self.capacity, self.slack).ok()?,
            ))
        }
    }

    fn attach(&mut self, shmid: i32) -> MediumResult<()> {
        let base = sysv::attach(shmid).map_err(|errno| {
            warn!("shmat on key {} failed: {}", self.key, errno);
            TransporterError::ShmUnableToAttachSegment
        })?;
        self.shmid = Some(shmid);
        self.base = Some(base);
        Ok(())
    }
}

impl LinkMedium for ShmLink {
    fn acquire(&mut self) -> MediumResult<bool> {
        if self.base.is_some() {
            return Ok(true);
        }
        match self.role {
            LinkRole::Creator => {
                let (shmid, fresh) = match sysv::create(self.key, self.segment_size) {
                    Ok(id) => (id, true),
                    Err(Errno::EEXIST) => {
                        let id = sysv::get(self.key, self.segment_size).map_err(|errno| {
                            warn!("shmget on leftover key {} failed: {}", self.key, errno);
                            TransporterError::ShmUnableToCreateSegment
                        })?;
                        (id, false)
                    }
                    Err(errno) => {
                        warn!("shmget(create) on key {} failed: {}", self.key, errno);
                        return Err(TransporterError::ShmUnableToCreateSegment);
                    }
                };
                self.attach(shmid)?;
                // Leftover segment with nobody else on it: flags are stale.
                if !fresh && self.peer_count()? == 1 {
                    if let Some((own, peer)) = self.region_views() {
                        own.set_ready(false);
                        peer.set_ready(false);
                    }
                }
            }
            LinkRole::Attacher => {
                let shmid = match sysv::get(self.key, self.segment_size) {
                    Ok(id) => id,
                    Err(Errno::ENOENT) => return Ok(false),
                    Err(errno) => {
                        warn!("shmget on key {} failed: {}", self.key, errno);
                        return Err(TransporterError::ShmUnableToAttachSegment);
                    }
                };
                self.attach(shmid)?;
            }
        }
        debug!("Attached shm segment key={} as {:?}", self.key, self.role);
        Ok(true)
    }

    fn peer_count(&self) -> MediumResult<u32> {
        let shmid = self.shmid.ok_or(TransporterError::ShmIpcStat)?;
        sysv::attach_count(shmid)
            .map(|n| n.min(u32::MAX as u64) as u32)
            .map_err(|errno| {
                warn!("shmctl(IPC_STAT) on key {} failed: {}", self.key, errno);
                TransporterError::ShmIpcStat
            })
    }

    fn setup_buffers(&mut self) -> MediumResult<()> {
        let (mut own, peer) = self
            .region_views()
            .ok_or(TransporterError::ShmUnableToAttachSegment)?;
        own.set_ready(false);
        own.clear();
        own.set_ready(true);
        self.send = Some(own);
        self.recv = Some(peer);
        Ok(())
    }

    fn peer_ready(&mut self) -> MediumResult<bool> {
        match (&self.send, &self.recv) {
            (Some(send), Some(recv)) => Ok(send.is_ready() && recv.is_ready()),
            _ => Ok(false),
        }
    }

    fn channels(&mut self) -> Option<(&mut RingChannel, &mut RingChannel)> {
        match (&mut self.send, &mut self.recv) {
            (Some(send), Some(recv)) => Some((send, recv)),
            _ => None,
        }
    }

    fn flush(&mut self) -> MediumResult<usize> {
        Ok(0)
    }

    fn fill(&mut self) -> MediumResult<usize> {
        Ok(0)
    }

    fn check_alive(&self) -> MediumResult<()> {
        match self.peer_count()? {
            2 => Ok(()),
            n if n > 2 => Err(TransporterError::PeerCountAnomaly),
            _ => Err(TransporterError::ShmDisconnect),
        }
    }

    fn release(&mut self) -> MediumResult<()> {
        self.send = None;
        self.recv = None;

        if let Some(base) = self.base.take() {
            if let Err(errno) = sysv::detach(base) {
                warn!("shmdt on key {} failed: {}", self.key, errno);
            }
        }

        let mut result = Ok(());
        if let Some(shmid) = self.shmid.take() {
            if self.role == LinkRole::Creator {
                if let Err(errno) = sysv::remove(shmid) {
                    warn!("shmctl(IPC_RMID) on key {} failed: {}", self.key, errno);
                    result = Err(TransporterError::ShmUnableToRemoveSegment);
                }
            }
        }
        debug!("Released shm segment key={}", self.key);
        result
    }
}

impl Drop for ShmLink {
    fn drop(&mut self) {
        if self.base.is_some() || self.shmid.is_some() {
            if let Err(e) = self.release() {
                warn!("Dropping shm link on key {} left cleanup undone: {}", self.key, e);
            }
        }
    }
}

/// Thin wrappers over the System V shared memory calls.
pub(crate) mod sysv {
    use nix::errno::Errno;
    use std::ptr::NonNull;

    /// `shmget` of an existing segment.
    pub fn get(key: i32, size: usize) -> Result<i32, Errno> {
        // SAFETY: plain syscall, no pointers.
        Errno::result(unsafe { libc::shmget(key, size, 0o600) })
    }

    /// `shmget` with `IPC_CREAT | IPC_EXCL`; `EEXIST` if the key is taken.
    pub fn create(key: i32, size: usize) -> Result<i32, Errno> {
        let flags = libc::IPC_CREAT | libc::IPC_EXCL | 0o600;
        // SAFETY: plain syscall, no pointers.
        Errno::result(unsafe { libc::shmget(key, size, flags) })
    }

    /// `shmat` at a kernel-chosen address.
    pub fn attach(shmid: i32) -> Result<NonNull<u8>, Errno> {
        // SAFETY: null address lets the kernel choose; result checked below.
        let addr = unsafe { libc::shmat(shmid, std::ptr::null(), 0) };
        if addr as isize == -1 {
            return Err(Errno::last());
        }
        NonNull::new(addr.cast::<u8>()).ok_or(Errno::EINVAL)
    }

    /// `shmdt`.
    pub fn detach(base: NonNull<u8>) -> Result<(), Errno> {
        // SAFETY: `base` came from `attach` and is detached once.
        Errno::result(unsafe { libc::shmdt(base.as_ptr().cast()) }).map(drop)
    }

    /// `shm_nattch` from `IPC_STAT`.
    pub fn attach_count(shmid: i32) -> Result<u64, Errno> {
        // SAFETY: shmid_ds is plain data; the kernel fills it.
        let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
        Errno::result(unsafe { libc::shmctl(shmid, libc::IPC_STAT, &mut ds) })?;
        Ok(ds.shm_nattch as u64)
    }

    /// Mark the segment for destruction.
    pub fn remove(shmid: i32) -> Result<(), Errno> {
        // SAFETY: IPC_RMID ignores the buffer argument.
        Errno::result(unsafe { libc::shmctl(shmid, libc::IPC_RMID, std::ptr::null_mut()) })
            .map(drop)
    }
}
