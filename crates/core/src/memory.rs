//! Safe foreign-memory accessor
//!
//! Every read, write and call into the host heap funnels through here. The
//! accessor validates the whole span against the OS page map before touching
//! it, so a stale or garbage handle comes back as a [`MemoryError`] instead
//! of tearing down the host process.
//!
//! Validation is a point-in-time check: the host can unmap a page between
//! the query and the access. In practice handles go stale across scene loads
//! (seconds), not mid-frame, and callers are expected to drop cached handles
//! on the first fault.

use std::ffi::c_void;

use grimoire_sdk::ForeignFn;

/// A rejected foreign-memory access.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("null handle")]
    NullHandle,

    #[error("span {addr:#x}+{len:#x} is not mapped readable")]
    Unreadable { addr: usize, len: usize },

    #[error("span {addr:#x}+{len:#x} is not mapped writable")]
    Unwritable { addr: usize, len: usize },

    #[error("entry point {addr:#x} is not mapped executable")]
    NotExecutable { addr: usize },
}

pub type MemoryResult<T> = Result<T, MemoryError>;

#[derive(Clone, Copy)]
enum Access {
    Read,
    Write,
    Execute,
}

/// Check that `[addr, addr + len)` is committed with the given access.
fn validate(addr: usize, len: usize, access: Access) -> MemoryResult<()> {
    if addr == 0 {
        return Err(MemoryError::NullHandle);
    }
    let fault = || match access {
        Access::Read => MemoryError::Unreadable { addr, len },
        Access::Write => MemoryError::Unwritable { addr, len },
        Access::Execute => MemoryError::NotExecutable { addr },
    };

    let regions = region::query_range(addr as *const u8, len).map_err(|_| fault())?;
    let mut covered = addr;
    for r in regions {
        let r = r.map_err(|_| fault())?;
        let ok = r.is_committed()
            && match access {
                Access::Read => r.is_readable(),
                Access::Write => r.is_writable(),
                Access::Execute => r.is_executable(),
            };
        if !ok {
            return Err(fault());
        }
        covered = r.as_range().end;
        if covered >= addr + len {
            break;
        }
    }
    if covered < addr + len {
        return Err(fault());
    }
    Ok(())
}

/// Read a `T` at `handle + offset` in the host heap.
pub fn read<T: Copy>(handle: *const c_void, offset: usize) -> MemoryResult<T> {
    if handle.is_null() {
        return Err(MemoryError::NullHandle);
    }
    let addr = handle as usize + offset;
    validate(addr, std::mem::size_of::<T>().max(1), Access::Read)?;
    // SAFETY: the span was committed and readable at validation time.
    Ok(unsafe { std::ptr::read_unaligned(addr as *const T) })
}

/// Write a `T` at `handle + offset` in the host heap.
pub fn write<T: Copy>(handle: *const c_void, offset: usize, value: T) -> MemoryResult<()> {
    if handle.is_null() {
        return Err(MemoryError::NullHandle);
    }
    let addr = handle as usize + offset;
    validate(addr, std::mem::size_of::<T>().max(1), Access::Write)?;
    // SAFETY: the span was committed and writable at validation time.
    unsafe { std::ptr::write_unaligned(addr as *mut T, value) };
    Ok(())
}

fn validate_callable(f: ForeignFn) -> MemoryResult<()> {
    if f.is_null() {
        return Err(MemoryError::NullHandle);
    }
    validate(f.addr(), 1, Access::Execute)
}

/// Invoke a zero-argument foreign entry point.
///
/// # Safety
///
/// The caller asserts that `f` really has the signature `fn() -> R` with the
/// platform call convention. Everything past the entry point runs foreign
/// code; the page check cannot catch a wrong signature.
pub unsafe fn call0<R>(f: ForeignFn) -> MemoryResult<R> {
    validate_callable(f)?;
    let target: unsafe extern "system" fn() -> R = std::mem::transmute_copy(&f.0);
    Ok(target())
}

/// Invoke a one-argument foreign entry point. See [`call0`] for safety.
pub unsafe fn call1<A, R>(f: ForeignFn, a: A) -> MemoryResult<R> {
    validate_callable(f)?;
    let target: unsafe extern "system" fn(A) -> R = std::mem::transmute_copy(&f.0);
    Ok(target(a))
}

/// Invoke a two-argument foreign entry point. See [`call0`] for safety.
pub unsafe fn call2<A, B, R>(f: ForeignFn, a: A, b: B) -> MemoryResult<R> {
    validate_callable(f)?;
    let target: unsafe extern "system" fn(A, B) -> R = std::mem::transmute_copy(&f.0);
    Ok(target(a, b))
}

/// Invoke a three-argument foreign entry point. See [`call0`] for safety.
pub unsafe fn call3<A, B, C, R>(f: ForeignFn, a: A, b: B, c: C) -> MemoryResult<R> {
    validate_callable(f)?;
    let target: unsafe extern "system" fn(A, B, C) -> R = std::mem::transmute_copy(&f.0);
    Ok(target(a, b, c))
}

/// Invoke a four-argument foreign entry point. See [`call0`] for safety.
pub unsafe fn call4<A, B, C, D, R>(f: ForeignFn, a: A, b: B, c: C, d: D) -> MemoryResult<R> {
    validate_callable(f)?;
    let target: unsafe extern "system" fn(A, B, C, D) -> R = std::mem::transmute_copy(&f.0);
    Ok(target(a, b, c, d))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Canonically non-canonical on x86-64; never mappable from user space.
    const BAD_ADDR: usize = 0xFFFF_8000_0000_0000;

    #[test]
    fn test_read_local_struct() {
        #[repr(C)]
        struct Fake {
            a: u32,
            b: u64,
        }
        let fake = Fake { a: 7, b: 99 };
        let base = &fake as *const Fake as *const c_void;
        assert_eq!(read::<u32>(base, 0).unwrap(), 7);
        assert_eq!(read::<u64>(base, 8).unwrap(), 99);
    }

    #[test]
    fn test_write_local() {
        let mut slot: u32 = 1;
        let base = &mut slot as *mut u32 as *const c_void;
        write::<u32>(base, 0, 42).unwrap();
        assert_eq!(slot, 42);
    }

    #[test]
    fn test_null_handle_faults() {
        let err = read::<u32>(std::ptr::null(), 0).unwrap_err();
        assert!(matches!(err, MemoryError::NullHandle));
        let err = write::<u32>(std::ptr::null(), 0, 0).unwrap_err();
        assert!(matches!(err, MemoryError::NullHandle));
    }

    #[test]
    fn test_unmapped_span_faults() {
        let err = read::<u32>(BAD_ADDR as *const c_void, 0).unwrap_err();
        assert!(matches!(err, MemoryError::Unreadable { .. }));
    }

    #[test]
    fn test_write_to_readonly_faults() {
        // Static string data lives in a read-only segment.
        let ro: &'static str = "immutable";
        let err = write::<u8>(ro.as_ptr() as *const c_void, 0, 0).unwrap_err();
        assert!(matches!(err, MemoryError::Unwritable { .. }));
    }

    #[test]
    fn test_call_rejects_null_and_data() {
        assert!(matches!(
            unsafe { call0::<()>(ForeignFn::null()) },
            Err(MemoryError::NullHandle)
        ));
        let data: u64 = 0;
        let f = ForeignFn(&data as *const u64 as *const c_void);
        assert!(matches!(
            unsafe { call0::<()>(f) },
            Err(MemoryError::NotExecutable { .. })
        ));
    }

    #[test]
    fn test_call_real_function() {
        extern "system" fn answer() -> u32 {
            41 + 1
        }
        let f = ForeignFn(answer as *const c_void);
        assert_eq!(unsafe { call0::<u32>(f).unwrap() }, 42);
    }
}
