// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Module for managing guest memory mappings.

use std::io;
use std::os::unix::io::RawFd;
use std::ptr::{copy_nonoverlapping, NonNull};

use crate::common::{GuestAddr, PAGE_OFFSET};
use crate::error::Error;
use crate::vmm::VmmHdl;

bitflags! {
    /// Bitflags representing memory protections.
    #[derive(Debug, Copy, Clone)]
    pub struct Prot: u8 {
        const NONE = 0;
        const READ = libc::PROT_READ as u8;
        const WRITE = libc::PROT_WRITE as u8;
        const RW = (libc::PROT_READ | libc::PROT_WRITE) as u8;
    }
}

/// An owned `mmap`-backed region of the process address space.
///
/// Once established, the mapping stays at a fixed host address until drop.
/// That is a correctness requirement, not a convenience: both consumers hand
/// the address across the kernel boundary (guest RAM via region
/// registration, the run page implicitly via the vCPU fd) and the kernel
/// retains it.
pub struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
    prot: Prot,
}

impl Mapping {
    /// Creates an anonymous shared mapping of `size` bytes, suitable for use
    /// as guest RAM.
    pub fn new_anon(size: usize) -> io::Result<Self> {
        Self::mmap_common(
            size,
            Prot::RW,
            libc::MAP_SHARED | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    }

    /// Creates a shared file mapping over `fd`, with the requested
    /// permissions.  Used for the kernel-shared vCPU run page.
    pub fn new_shared(
        size: usize,
        prot: Prot,
        fd: RawFd,
        devoff: i64,
    ) -> io::Result<Self> {
        Self::mmap_common(size, prot, libc::MAP_SHARED, fd, devoff)
    }

    fn mmap_common(
        size: usize,
        prot: Prot,
        flags: i32,
        fd: RawFd,
        devoff: i64,
    ) -> io::Result<Self> {
        // Safety:
        // With a NULL `addr`, the OS will pick a mapping location which does
        // not conflict with other resources.  It is the responsibility of
        // the caller to ensure that any underlying fd resources are not
        // destroyed prior to `Mapping`s which refer to them.
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                size,
                prot.bits().into(),
                flags,
                fd,
                devoff,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(ptr as *mut u8)
            .expect("mmap() result should be non-NULL");

        Ok(Self { ptr, len: size, prot })
    }

    pub fn len(&self) -> usize {
        self.len
    }
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The fixed host address of the mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Copy bytes out of the mapping at `offset`.
    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> io::Result<()> {
        self.check_access(offset, buf.len(), Prot::READ)?;

        // Safety: bounds and protections were checked above; `buf` came from
        // a valid mutable reference and cannot overlap the mapping.
        unsafe {
            copy_nonoverlapping(
                self.ptr.as_ptr().add(offset),
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
        Ok(())
    }

    /// Copy bytes into the mapping at `offset`.
    pub fn write_bytes(&self, offset: usize, data: &[u8]) -> io::Result<()> {
        self.check_access(offset, data.len(), Prot::WRITE)?;

        // Safety: bounds and protections were checked above; `data` came
        // from a valid reference and cannot overlap the mapping.
        unsafe {
            copy_nonoverlapping(
                data.as_ptr(),
                self.ptr.as_ptr().add(offset),
                data.len(),
            );
        }
        Ok(())
    }

    /// Copy a `T` out of the mapping at `offset`.
    pub(crate) fn read<T: Copy>(&self, offset: usize) -> io::Result<T> {
        self.check_access(offset, std::mem::size_of::<T>(), Prot::READ)?;

        // Safety: bounds were checked above; the read is performed unaligned
        // and by copy, so no reference to the shared memory escapes.
        Ok(unsafe {
            (self.ptr.as_ptr().add(offset) as *const T).read_unaligned()
        })
    }

    /// Borrow the mapping contents as a byte slice.
    ///
    /// # Safety
    ///
    /// The caller must guarantee the kernel is not concurrently writing the
    /// mapping, i.e. for a run page that no VM entry is in flight.
    pub(crate) unsafe fn as_bytes(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr.as_ptr(), self.len)
    }

    fn check_access(
        &self,
        offset: usize,
        len: usize,
        prot: Prot,
    ) -> io::Result<()> {
        if !self.prot.contains(prot) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "access not permitted by mapping",
            ));
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "access beyond end of mapping",
            )),
        }
    }
}
impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

// Safety: `Mapping`'s API only hands out raw pointers and copies, never
// references to the underlying data.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

/// A host-owned buffer registered as the guest's physical address space over
/// `[base, base + len)`.
pub struct GuestRam {
    base: GuestAddr,
    slot: u32,
    mapping: Mapping,
}

impl GuestRam {
    /// Allocate (but do not yet register) a guest memory region.
    ///
    /// Alignment and size are validated here, before any allocation or
    /// kernel call is made.
    pub fn new(base: GuestAddr, size: usize, slot: u32) -> Result<Self, Error> {
        if size == 0 {
            return Err(Error::MemRegion("size must be nonzero"));
        }
        if size & PAGE_OFFSET != 0 {
            return Err(Error::MemRegion("size must be page-aligned"));
        }
        if base.0 & PAGE_OFFSET as u64 != 0 {
            return Err(Error::MemRegion("base must be page-aligned"));
        }
        if base.0.checked_add(size as u64).is_none() {
            return Err(Error::MemRegion("region wraps the address space"));
        }

        let mapping =
            Mapping::new_anon(size).map_err(Error::MemRegistration)?;
        Ok(Self { base, slot, mapping })
    }

    pub fn base(&self) -> GuestAddr {
        self.base
    }
    pub fn len(&self) -> usize {
        self.mapping.len()
    }
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Register the region with the VM.  After this returns, the kernel
    /// reads the backing buffer as guest-physical memory; host-side writes
    /// (such as the guest loader's) take effect without further kernel
    /// calls.
    pub fn register(&self, hdl: &VmmHdl) -> Result<(), Error> {
        hdl.set_user_memory_region(
            self.slot,
            self.base.0,
            self.len() as u64,
            self.mapping.as_ptr() as u64,
        )
        .map_err(Error::MemRegistration)
    }

    /// Copy bytes out of the region.  `offset` is region-relative, which by
    /// the flat addressing setup equals `guest_addr - base`.
    pub fn read_bytes(
        &self,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        self.mapping
            .read_bytes(offset, buf)
            .map_err(|_| Error::MemRegion("access outside region"))
    }

    /// Copy bytes into the region at a region-relative `offset`.
    pub fn write_bytes(&self, offset: usize, data: &[u8]) -> Result<(), Error> {
        self.mapping
            .write_bytes(offset, data)
            .map_err(|_| Error::MemRegion("access outside region"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn region_validation() {
        let ok = GuestRam::new(GuestAddr(0), 0x1000, 0);
        assert!(ok.is_ok());

        for (base, size) in [
            (GuestAddr(0), 0usize),
            (GuestAddr(0), 0x1234),
            (GuestAddr(0x800), 0x1000),
            (GuestAddr(u64::MAX & !0xfff), 0x2000),
        ] {
            match GuestRam::new(base, size, 0) {
                Err(Error::MemRegion(_)) => {}
                other => panic!(
                    "expected rejection of base={base:?} size={size:#x}, \
                     got {:?}",
                    other.map(|_| ())
                ),
            }
        }
    }

    #[test]
    fn region_rw_round_trip() {
        let ram = GuestRam::new(GuestAddr(0), 0x1000, 0).unwrap();

        let data = [0xa5u8, 0x5a, 0x00, 0xff];
        ram.write_bytes(0x800, &data).unwrap();

        let mut readback = [0u8; 4];
        ram.read_bytes(0x800, &mut readback).unwrap();
        assert_eq!(readback, data);
    }

    #[test]
    fn region_access_bounds() {
        let ram = GuestRam::new(GuestAddr(0), 0x1000, 0).unwrap();

        assert!(ram.write_bytes(0x1000, &[0u8]).is_err());
        assert!(ram.write_bytes(0xfff, &[0u8, 0u8]).is_err());
        assert!(ram.write_bytes(0xfff, &[0u8]).is_ok());

        let mut buf = [0u8; 2];
        assert!(ram.read_bytes(0xfff, &mut buf).is_err());
    }

    #[test]
    fn register_with_test_hdl() {
        let hdl = VmmHdl::new_test(0x1000).unwrap();
        let ram = GuestRam::new(GuestAddr(0), 0x1000, 0).unwrap();
        ram.register(&hdl).unwrap();
    }
}
