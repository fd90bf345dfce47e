//! POSIX shared-memory frame sink
//!
//! Each named region holds the most recent frame written to it. Readers
//! map the same name; `close` unmaps and unlinks.

use std::collections::HashMap;
use std::ffi::CString;
use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShmError {
    #[error("invalid shared memory name '{0}'")]
    InvalidName(String),
    #[error("{call} failed for {name}: {source}")]
    Os {
        call: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("no shared memory region named {0}")]
    NotOpen(String),
}

fn os_error(call: &'static str, name: &str) -> ShmError {
    ShmError::Os {
        call,
        name: name.to_string(),
        source: io::Error::last_os_error(),
    }
}

/// `frames` -> `/frames`. Names may not contain further slashes.
pub fn normalize_name(name: &str) -> Result<String, ShmError> {
    let trimmed = name.strip_prefix('/').unwrap_or(name);
    if trimmed.is_empty() || trimmed.contains('/') || trimmed.contains('\0') || trimmed.len() > 250 {
        return Err(ShmError::InvalidName(name.to_string()));
    }
    Ok(format!("/{}", trimmed))
}

struct Region {
    fd: libc::c_int,
    ptr: *mut libc::c_void,
    len: usize,
}

impl Region {
    fn unmap(&mut self) {
        if !self.ptr.is_null() && self.len > 0 {
            unsafe {
                libc::munmap(self.ptr, self.len);
            }
        }
        self.ptr = std::ptr::null_mut();
        self.len = 0;
    }

    fn release(mut self) {
        self.unmap();
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Writer side. Regions stay mapped between writes.
#[derive(Default)]
pub struct ShmSink {
    regions: HashMap<String, Region>,
}

// Mappings are only touched through &mut self.
unsafe impl Send for ShmSink {}

impl ShmSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the content of region `name` with `bytes`, resizing it to fit.
    pub fn write(&mut self, name: &str, bytes: &[u8]) -> Result<(), ShmError> {
        let name = normalize_name(name)?;
        if !self.regions.contains_key(&name) {
            let fd = open_region(&name, libc::O_CREAT | libc::O_RDWR)?;
            tracing::info!("Created shared memory region {}", name);
            self.regions.insert(
                name.clone(),
                Region {
                    fd,
                    ptr: std::ptr::null_mut(),
                    len: 0,
                },
            );
        }
        let Some(region) = self.regions.get_mut(&name) else {
            return Err(ShmError::NotOpen(name));
        };

        if region.len != bytes.len() {
            region.unmap();
            if unsafe { libc::ftruncate(region.fd, bytes.len() as libc::off_t) } != 0 {
                return Err(os_error("ftruncate", &name));
            }
            if !bytes.is_empty() {
                let ptr = unsafe {
                    libc::mmap(
                        std::ptr::null_mut(),
                        bytes.len(),
                        libc::PROT_READ | libc::PROT_WRITE,
                        libc::MAP_SHARED,
                        region.fd,
                        0,
                    )
                };
                if ptr == libc::MAP_FAILED {
                    return Err(os_error("mmap", &name));
                }
                region.ptr = ptr;
                region.len = bytes.len();
            }
        }

        if !bytes.is_empty() {
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), region.ptr as *mut u8, bytes.len());
            }
        }
        Ok(())
    }

    /// Unmap and unlink region `name`.
    pub fn close(&mut self, name: &str) -> Result<(), ShmError> {
        let name = normalize_name(name)?;
        let region = self.regions.remove(&name).ok_or_else(|| ShmError::NotOpen(name.clone()))?;
        region.release();
        unlink(&name)
    }
}

impl Drop for ShmSink {
    fn drop(&mut self) {
        let names: Vec<String> = self.regions.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.close(&name) {
                tracing::warn!("{}", e);
            }
        }
    }
}

/// Copy out the current content of region `name`.
pub fn read(name: &str) -> Result<Vec<u8>, ShmError> {
    let name = normalize_name(name)?;
    let fd = open_region(&name, libc::O_RDONLY)?;

    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut stat) } != 0 {
        let err = os_error("fstat", &name);
        unsafe { libc::close(fd) };
        return Err(err);
    }

    let len = stat.st_size as usize;
    let mut out = vec![0u8; len];
    if len > 0 {
        let ptr = unsafe { libc::mmap(std::ptr::null_mut(), len, libc::PROT_READ, libc::MAP_SHARED, fd, 0) };
        if ptr == libc::MAP_FAILED {
            let err = os_error("mmap", &name);
            unsafe { libc::close(fd) };
            return Err(err);
        }
        unsafe {
            std::ptr::copy_nonoverlapping(ptr as *const u8, out.as_mut_ptr(), len);
            libc::munmap(ptr, len);
        }
    }
    unsafe { libc::close(fd) };
    Ok(out)
}

fn open_region(name: &str, flags: libc::c_int) -> Result<libc::c_int, ShmError> {
    let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), flags, 0o600 as libc::mode_t) };
    if fd < 0 {
        return Err(os_error("shm_open", name));
    }
    Ok(fd)
}

fn unlink(name: &str) -> Result<(), ShmError> {
    let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;
    if unsafe { libc::shm_unlink(c_name.as_ptr()) } != 0 {
        return Err(os_error("shm_unlink", name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("frames").unwrap(), "/frames");
        assert_eq!(normalize_name("/frames").unwrap(), "/frames");
        assert!(normalize_name("").is_err());
        assert!(normalize_name("/").is_err());
        assert!(normalize_name("a/b").is_err());
    }

    #[test]
    fn test_write_read_close() {
        let name = format!("hevcva-test-{}", std::process::id());
        let mut sink = ShmSink::new();

        sink.write(&name, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(read(&name).unwrap(), vec![1, 2, 3, 4, 5, 6]);

        sink.write(&name, &[9, 8, 7]).unwrap();
        assert_eq!(read(&name).unwrap(), vec![9, 8, 7]);

        sink.close(&name).unwrap();
        assert!(read(&name).is_err());
        assert!(matches!(sink.close(&name), Err(ShmError::NotOpen(_))));
    }
}
