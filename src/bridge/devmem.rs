//! Memory-mapped FPGA register window.
//!
//! The window is mapped from a memory device: `/dev/mem` at the FPGA's
//! physical base, or a PCI `resourceN` file in sysfs at offset zero. Either
//! way this needs root.

use std::path::Path;

use super::RegisterBridge;
use crate::error::BridgeError;

#[cfg(unix)]
pub struct DevMemBridge {
    /// Start of the requested window inside the mapping
    ptr: *mut u8,
    /// Bytes usable from `ptr`
    size: usize,
    /// Page-aligned mapping, what munmap wants back
    map_ptr: *mut libc::c_void,
    map_size: usize,
}

#[cfg(unix)]
impl DevMemBridge {
    pub fn open<P: AsRef<Path>>(path: P, base: u64, size: usize) -> Result<Self, BridgeError> {
        use std::fs::OpenOptions;
        use std::os::unix::fs::OpenOptionsExt;
        use std::os::unix::io::AsRawFd;

        let path = path.as_ref();
        // O_SYNC keeps the register window uncached
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|source| BridgeError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let page_mask = page_size - 1;
        let offset = (base as usize) & page_mask;
        let aligned_base = base & !(page_mask as u64);
        let map_size = (size + offset + page_mask) & !page_mask;

        let map_ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                aligned_base as libc::off_t,
            )
        };
        if map_ptr == libc::MAP_FAILED {
            return Err(BridgeError::Map {
                address: base,
                size,
                source: std::io::Error::last_os_error(),
            });
        }
        log::debug!(
            "mapped {} at {:#x} ({:#x} bytes)",
            path.display(),
            base,
            size
        );

        // The mapping outlives the descriptor, `file` can close here.
        Ok(DevMemBridge {
            ptr: unsafe { (map_ptr as *mut u8).add(offset) },
            size,
            map_ptr,
            map_size,
        })
    }

    /// Whether a 32-bit register at `offset` lies inside the window.
    pub fn contains(&self, offset: usize) -> bool {
        offset % 4 == 0 && offset + 4 <= self.size
    }

    pub fn ensure_register(&self, offset: usize) -> Result<(), BridgeError> {
        if self.contains(offset) {
            Ok(())
        } else {
            Err(BridgeError::Window {
                offset,
                size: self.size,
            })
        }
    }
}

#[cfg(unix)]
impl RegisterBridge for DevMemBridge {
    #[inline]
    fn read32(&mut self, offset: usize) -> u32 {
        assert!(self.contains(offset), "register {offset:#x} outside window");
        unsafe { core::ptr::read_volatile(self.ptr.add(offset) as *const u32) }
    }

    #[inline]
    fn write32(&mut self, offset: usize, value: u32) {
        assert!(self.contains(offset), "register {offset:#x} outside window");
        unsafe { core::ptr::write_volatile(self.ptr.add(offset) as *mut u32, value) }
    }
}

#[cfg(unix)]
impl Drop for DevMemBridge {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.map_ptr, self.map_size);
        }
    }
}

#[cfg(not(unix))]
pub struct DevMemBridge {
    _private: (),
}

#[cfg(not(unix))]
impl DevMemBridge {
    pub fn open<P: AsRef<Path>>(path: P, _base: u64, _size: usize) -> Result<Self, BridgeError> {
        Err(BridgeError::Open {
            path: path.as_ref().to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "memory mapped register access requires a unix target",
            ),
        })
    }

    pub fn contains(&self, _offset: usize) -> bool {
        false
    }

    pub fn ensure_register(&self, offset: usize) -> Result<(), BridgeError> {
        Err(BridgeError::Window { offset, size: 0 })
    }
}

#[cfg(not(unix))]
impl RegisterBridge for DevMemBridge {
    fn read32(&mut self, _offset: usize) -> u32 {
        0
    }

    fn write32(&mut self, _offset: usize, _value: u32) {}
}
