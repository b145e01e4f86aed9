//! Physical register access through `/dev/mem`.
//!
//! Maps the page holding the register and performs volatile 32-bit
//! accesses at the register's offset within it. Requires `CAP_SYS_RAWIO`
//! (usually root) and a kernel that exposes the address range.

#![allow(unsafe_code)]

use crate::register::RegisterAccess;
use oc_common::error::{OcError, OcResult};
use std::path::Path;
use tracing::{debug, info};

#[cfg(target_os = "linux")]
use std::{ffi::c_void, ptr::NonNull};

/// Register mapped from a physical address.
#[cfg(target_os = "linux")]
#[derive(Debug)]
pub struct DevMemRegister {
    base: NonNull<c_void>,
    map_len: usize,
    offset: usize,
    address: u64,
}

// SAFETY: the mapping is owned exclusively by this value and only touched
// through volatile accesses; moving it between threads is sound.
#[cfg(target_os = "linux")]
unsafe impl Send for DevMemRegister {}

#[cfg(target_os = "linux")]
impl DevMemRegister {
    /// Map the register at physical `address` through `device`.
    ///
    /// # Errors
    ///
    /// Returns [`OcError::Register`] if the address is not word aligned, the
    /// device cannot be opened, or the mapping fails.
    pub fn open(device: &Path, address: u64) -> OcResult<Self> {
        use nix::sys::mman::{mmap, MapFlags, ProtFlags};
        use std::fs::OpenOptions;
        use std::num::NonZeroUsize;
        use std::os::unix::fs::OpenOptionsExt;

        if address % 4 != 0 {
            return Err(OcError::Register(format!(
                "address {address:#x} is not 32-bit aligned"
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(device)
            .map_err(|e| OcError::Register(format!("failed to open {}: {e}", device.display())))?;

        let page = page_size();
        let page_base = address & !(page as u64 - 1);
        let offset = usize::try_from(address - page_base)
            .map_err(|e| OcError::Register(format!("offset out of range: {e}")))?;
        let map_len = NonZeroUsize::new(page)
            .ok_or_else(|| OcError::Register("page size reported as zero".into()))?;
        let file_offset = libc::off_t::try_from(page_base)
            .map_err(|e| OcError::Register(format!("address {address:#x} out of range: {e}")))?;

        debug!(address = format_args!("{address:#x}"), page, offset, "Mapping register page");

        // SAFETY: a fresh shared mapping of a device page; no Rust references
        // alias it and the file descriptor may close once the mapping exists.
        let base = unsafe {
            mmap(
                None,
                map_len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                file_offset,
            )
        }
        .map_err(|e| OcError::Register(format!("mmap of {address:#x} failed: {e}")))?;

        info!(address = format_args!("{address:#x}"), "Register mapped");
        Ok(Self {
            base,
            map_len: page,
            offset,
            address,
        })
    }

    /// Physical address of the mapped register.
    pub fn address(&self) -> u64 {
        self.address
    }

    fn word(&self) -> *mut u32 {
        // SAFETY: offset < map_len and is 4-byte aligned, checked in `open`.
        unsafe { self.base.as_ptr().cast::<u8>().add(self.offset).cast::<u32>() }
    }
}

#[cfg(target_os = "linux")]
impl RegisterAccess for DevMemRegister {
    fn read32(&self) -> u32 {
        // SAFETY: `word` points into a live mapping owned by self.
        unsafe { self.word().read_volatile() }
    }

    fn write32(&mut self, value: u32) {
        // SAFETY: as for read32; &mut self serializes writers.
        unsafe { self.word().write_volatile(value) }
    }
}

#[cfg(target_os = "linux")]
impl Drop for DevMemRegister {
    fn drop(&mut self) {
        // SAFETY: base/map_len come from the successful mmap in `open`.
        if let Err(e) = unsafe { nix::sys::mman::munmap(self.base, self.map_len) } {
            tracing::warn!(error = %e, "munmap of register page failed");
        }
    }
}

/// Physical register access is only implemented for Linux.
#[cfg(not(target_os = "linux"))]
#[derive(Debug)]
pub struct DevMemRegister;

#[cfg(not(target_os = "linux"))]
impl DevMemRegister {
    /// Always fails on this platform.
    ///
    /// # Errors
    ///
    /// Returns [`OcError::Register`].
    pub fn open(device: &Path, address: u64) -> OcResult<Self> {
        debug!(device = %device.display(), address, "devmem requested");
        info!("Physical register access is unavailable on this platform");
        Err(OcError::Register(
            "/dev/mem register access requires Linux".into(),
        ))
    }
}

#[cfg(not(target_os = "linux"))]
impl RegisterAccess for DevMemRegister {
    fn read32(&self) -> u32 {
        0
    }

    fn write32(&mut self, _value: u32) {}
}

/// Get system page size.
#[cfg(target_os = "linux")]
fn page_size() -> usize {
    // SAFETY: sysconf is safe to call
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).unwrap_or(4096)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device() {
        let err = DevMemRegister::open(Path::new("/nonexistent/mem"), 0x4006_4000).unwrap_err();
        assert!(matches!(err, OcError::Register(_)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unaligned_address() {
        let err = DevMemRegister::open(Path::new("/dev/mem"), 0x4006_4002).unwrap_err();
        assert!(err.to_string().contains("not 32-bit aligned"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_page_size() {
        let ps = page_size();
        assert!(ps > 0);
        assert!(ps.is_power_of_two());
    }
}
