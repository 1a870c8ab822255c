// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fs::{File, OpenOptions};
use std::io::{Error, ErrorKind, Result};
use std::os::fd::*;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::atomic::{AtomicI64, Ordering};

pub use kvm_api_sys::*;

pub const KVM_CTL_PATH: &str = "/dev/kvm";

/// Handle to the kernel hypervisor control device.
///
/// System-scoped queries (API version, run-page mmap size) and VM creation
/// are issued against this fd; everything else happens on the fds it vends.
pub struct KvmCtlFd(File);
impl KvmCtlFd {
    pub fn open() -> Result<Self> {
        let ctl = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(KVM_CTL_PATH)?;
        Ok(Self(ctl))
    }

    /// Create new instance from raw `File` resource
    ///
    /// # Safety
    ///
    /// Caller is expected to provide a `File` resource which is a valid KVM
    /// control device.  (Or alternatively, is not to make any KVM-related
    /// ioctls, if this instance was created for unit-testing purposes.)
    pub unsafe fn new_raw(fp: File) -> Self {
        Self(fp)
    }

    /// Issue ioctl against the open control handle
    ///
    /// # Safety
    ///
    /// Caller is charged with providing `data` argument which is adequate for
    /// any copyin/copyout actions which may occur as part of the ioctl
    /// processing.
    pub unsafe fn ioctl<T>(&self, cmd: u64, data: *mut T) -> Result<i32> {
        ioctl(self.as_raw_fd(), cmd, data as *mut libc::c_void)
    }
    pub fn ioctl_usize(&self, cmd: u64, data: usize) -> Result<i32> {
        if !Self::ioctl_usize_safe(cmd) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "unsafe cmd provided",
            ));
        }
        // Safety: Since we are explicitly filtering for ioctls which will not
        // assume the data argument is a pointer for copyin/copyout, we can
        // dismiss those dangers.
        unsafe { ioctl(self.as_raw_fd(), cmd, data as *mut libc::c_void) }
    }

    /// Query the API version exposed by the kernel hypervisor.
    pub fn api_version(&self) -> Result<u32> {
        cache_api_version(|| -> Result<u32> { self.query_api_version() })
    }

    /// Perform the actual query of the API version
    fn query_api_version(&self) -> Result<u32> {
        let vers = self.ioctl_usize(ioctls::KVM_GET_API_VERSION, 0)?;

        // KVM_GET_API_VERSION reports a positive version number on anything
        // resembling a functional kernel interface.
        assert!(vers > 0);
        Ok(vers as u32)
    }

    /// Query the size of the per-vCPU shared run page.  The mapping over a
    /// vCPU fd must be exactly this many bytes, never an assumed constant:
    /// the kernel stores transient structures beyond the `kvm_run` head.
    pub fn vcpu_mmap_size(&self) -> Result<usize> {
        let sz = self.ioctl_usize(ioctls::KVM_GET_VCPU_MMAP_SIZE, 0)?;
        assert!(sz > 0);
        Ok(sz as usize)
    }

    /// Create a new VM, returning the fd which represents it.
    pub fn create_vm(&self) -> Result<VmFd> {
        let fd = self.ioctl_usize(ioctls::KVM_CREATE_VM, 0)?;

        // Safety: KVM_CREATE_VM vends ownership of a fresh fd to the caller.
        Ok(unsafe { VmFd::from_raw(fd) })
    }

    /// Check ioctl commands against those known to not require any
    /// copyin/copyout to function.
    const fn ioctl_usize_safe(cmd: u64) -> bool {
        matches!(
            cmd,
            ioctls::KVM_GET_API_VERSION
                | ioctls::KVM_CREATE_VM
                | ioctls::KVM_CHECK_EXTENSION
                | ioctls::KVM_GET_VCPU_MMAP_SIZE,
        )
    }
}

impl AsRawFd for KvmCtlFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// Handle to a created VM.
pub struct VmFd(File);
impl VmFd {
    /// Create new instance from raw `File` resource
    ///
    /// # Safety
    ///
    /// Caller is expected to provide a `File` resource which is a valid VM
    /// fd.  (Or alternatively, is not to make any VM-related ioctls, if this
    /// instance was created for unit-testing purposes.)
    pub unsafe fn new_raw(fp: File) -> Self {
        Self(fp)
    }

    unsafe fn from_raw(fd: i32) -> Self {
        Self(File::from_raw_fd(fd))
    }

    /// Issue ioctl against the open VM fd
    ///
    /// # Safety
    ///
    /// Caller is charged with providing `data` argument which is adequate for
    /// any copyin/copyout actions which may occur as part of the ioctl
    /// processing.
    pub unsafe fn ioctl<T>(&self, cmd: u64, data: *mut T) -> Result<i32> {
        ioctl(self.as_raw_fd(), cmd, data as *mut libc::c_void)
    }
    pub fn ioctl_usize(&self, cmd: u64, data: usize) -> Result<i32> {
        if !Self::ioctl_usize_safe(cmd) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "unsafe cmd provided",
            ));
        }
        // Safety: filtered to commands taking a plain integer argument.
        unsafe { ioctl(self.as_raw_fd(), cmd, data as *mut libc::c_void) }
    }

    /// Create a vCPU within this VM, identified by `id`, returning the fd
    /// which represents it.
    pub fn create_vcpu(&self, id: i32) -> Result<VcpuFd> {
        assert!(id >= 0);
        let fd = self.ioctl_usize(ioctls::KVM_CREATE_VCPU, id as usize)?;

        // Safety: KVM_CREATE_VCPU vends ownership of a fresh fd to the caller.
        Ok(unsafe { VcpuFd(File::from_raw_fd(fd)) })
    }

    const fn ioctl_usize_safe(cmd: u64) -> bool {
        matches!(cmd, ioctls::KVM_CREATE_VCPU,)
    }
}

impl AsRawFd for VmFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// Handle to a vCPU.  The shared run page is mapped over this fd.
pub struct VcpuFd(File);
impl VcpuFd {
    /// Issue ioctl against the open vCPU fd
    ///
    /// # Safety
    ///
    /// Caller is charged with providing `data` argument which is adequate for
    /// any copyin/copyout actions which may occur as part of the ioctl
    /// processing.
    pub unsafe fn ioctl<T>(&self, cmd: u64, data: *mut T) -> Result<i32> {
        ioctl(self.as_raw_fd(), cmd, data as *mut libc::c_void)
    }
    pub fn ioctl_usize(&self, cmd: u64, data: usize) -> Result<i32> {
        if !Self::ioctl_usize_safe(cmd) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "unsafe cmd provided",
            ));
        }
        // Safety: filtered to commands ignoring the data argument.
        unsafe { ioctl(self.as_raw_fd(), cmd, data as *mut libc::c_void) }
    }

    const fn ioctl_usize_safe(cmd: u64) -> bool {
        matches!(cmd, ioctls::KVM_RUN,)
    }
}

impl AsRawFd for VcpuFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// Store a cached copy of the queried API version.  Negative values indicate
/// an error occurred during query (and hold the corresponding negated
/// `errno`).  A positive value indicates the cached version, and should be
/// less than `u32::MAX`.  A value of 0 indicates that no query has been
/// performed yet.
static VERSION_CACHE: AtomicI64 = AtomicI64::new(0);

/// Query the API version from the kernel hypervisor on the system.
///
/// Caches said version (or any emitted error) for later calls.
pub fn api_version() -> Result<u32> {
    cache_api_version(|| -> Result<u32> {
        let ctl = KvmCtlFd::open()?;
        let vers = ctl.query_api_version()?;
        Ok(vers)
    })
}

fn cache_api_version(do_query: impl FnOnce() -> Result<u32>) -> Result<u32> {
    if VERSION_CACHE.load(Ordering::Acquire) == 0 {
        let newval = match do_query() {
            Ok(x) => x as i64,
            Err(e) => -(e.raw_os_error().unwrap_or(libc::ENOENT) as i64),
        };
        let _ = VERSION_CACHE.compare_exchange(
            0,
            newval,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    match VERSION_CACHE.load(Ordering::Acquire) {
        0 => {
            panic!("expected VERSION_CACHE to be initialized")
        }
        x if x < 0 => Err(Error::from_raw_os_error(-x as i32)),
        y => {
            assert!(y < u32::MAX as i64);

            Ok(y as u32)
        }
    }
}

#[cfg(target_os = "linux")]
unsafe fn ioctl(fd: RawFd, cmd: u64, data: *mut libc::c_void) -> Result<i32> {
    match libc::ioctl(fd, cmd, data) {
        -1 => Err(Error::last_os_error()),
        other => Ok(other),
    }
}

#[cfg(not(target_os = "linux"))]
unsafe fn ioctl(
    _fd: RawFd,
    _cmd: u64,
    _data: *mut libc::c_void,
) -> Result<i32> {
    Err(Error::new(ErrorKind::Other, "linux required"))
}

/// Convenience constants documenting the supported API generations.  KVM
/// froze its top-level version long ago; everything since is gated behind
/// capability checks rather than version bumps.
#[repr(u32)]
pub enum ApiVersion {
    /// The stable KVM interface version.
    V12 = 12,
}
impl ApiVersion {
    pub const fn current() -> Self {
        Self::V12
    }
}
impl From<ApiVersion> for u32 {
    fn from(v: ApiVersion) -> Self {
        v as u32
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn latest_api_version() {
        let cur = ApiVersion::current();
        assert_eq!(KVM_CURRENT_INTERFACE_VERSION, cur.into());
    }
}
