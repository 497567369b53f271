//! Executable slot allocation near hook targets
//!
//! A rel32 `jmp` only reaches ±2GB, so the stub and trampoline for a hook
//! must live close to the function being patched. The allocator maps RWX
//! pages near the target (probing below the target first, then above) and
//! carves them into fixed-size slots. Pages are never unmapped while hooks
//! exist; the process exits with them mapped.

use std::ptr::NonNull;

use parking_lot::Mutex;

const PAGE_SIZE: usize = 4096;

/// One slot is enough for a 14-byte stub plus a relocated prologue and the
/// jump back.
pub const SLOT_SIZE: usize = 128;

/// Keep a safety margin under the 2GB rel32 limit.
const NEAR_LIMIT: usize = 0x7FF0_0000;

/// Step between probe addresses when hunting for a free region.
const PROBE_STRIDE: usize = PAGE_SIZE * 256;

static POOL: Mutex<SlotPool> = Mutex::new(SlotPool::new());

struct MappedPage {
    base: *mut u8,
    next_slot: usize,
}

// SAFETY: pages are only reached through the pool mutex.
unsafe impl Send for MappedPage {}

struct SlotPool {
    pages: Vec<MappedPage>,
}

impl SlotPool {
    const fn new() -> Self {
        SlotPool { pages: Vec::new() }
    }

    fn take_slot(&mut self, target: usize) -> Option<NonNull<u8>> {
        if let Some(page) = self.pages.iter_mut().find(|p| {
            in_reach(p.base as usize, target) && p.next_slot + SLOT_SIZE <= PAGE_SIZE
        }) {
            let ptr = unsafe { page.base.add(page.next_slot) };
            page.next_slot += SLOT_SIZE;
            return NonNull::new(ptr);
        }

        let base = map_page_near(target)?;
        self.pages.push(MappedPage { base, next_slot: SLOT_SIZE });
        NonNull::new(base)
    }
}

fn in_reach(addr: usize, target: usize) -> bool {
    addr.abs_diff(target) < NEAR_LIMIT
}

/// Probe addresses spiralling out from the target, nearest first.
fn probe_addresses(target: usize) -> impl Iterator<Item = usize> {
    (1..NEAR_LIMIT / PROBE_STRIDE).flat_map(move |i| {
        let delta = i * PROBE_STRIDE;
        [target.checked_sub(delta), target.checked_add(delta)]
            .into_iter()
            .flatten()
            .filter(|&a| a != 0)
    })
}

#[cfg(unix)]
fn map_page_near(target: usize) -> Option<*mut u8> {
    use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
    use std::num::NonZeroUsize;

    let prot = ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC;
    let flags = MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS;
    let len = NonZeroUsize::new(PAGE_SIZE)?;

    for hint in probe_addresses(target) {
        let Ok(mapping) = (unsafe { mmap_anonymous(NonZeroUsize::new(hint), len, prot, flags) })
        else {
            continue;
        };
        let base = mapping.as_ptr() as *mut u8;
        // The kernel treats the hint as advisory and may place us anywhere.
        if in_reach(base as usize, target) {
            return Some(base);
        }
        unsafe {
            let _ = munmap(mapping, PAGE_SIZE);
        }
    }

    // Out-of-reach fallback still serves absolute-jump stubs.
    match unsafe { mmap_anonymous(None, len, prot, flags) } {
        Ok(mapping) => {
            let base = mapping.as_ptr() as *mut u8;
            tracing::warn!(
                target_addr = format_args!("{target:#x}"),
                slot = format_args!("{:#x}", base as usize),
                "no executable page within rel32 reach"
            );
            Some(base)
        }
        Err(e) => {
            tracing::error!(target_addr = format_args!("{target:#x}"), error = %e, "slot mapping failed");
            None
        }
    }
}

#[cfg(windows)]
fn map_page_near(target: usize) -> Option<*mut u8> {
    use windows::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READWRITE,
    };

    for hint in probe_addresses(target) {
        let base = unsafe {
            VirtualAlloc(
                Some(hint as *const std::ffi::c_void),
                PAGE_SIZE,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_EXECUTE_READWRITE,
            )
        };
        if base.is_null() {
            continue;
        }
        if in_reach(base as usize, target) {
            return Some(base as *mut u8);
        }
        unsafe {
            let _ = VirtualFree(base, 0, MEM_RELEASE);
        }
    }

    tracing::error!(
        target_addr = format_args!("{target:#x}"),
        "no executable page within rel32 reach"
    );
    None
}

/// Hand out one RWX slot of [`SLOT_SIZE`] bytes near `target`.
pub fn alloc_slot(target: usize) -> Option<NonNull<u8>> {
    POOL.lock().take_slot(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_allocation_near_code() {
        let target = test_slot_allocation_near_code as usize;
        let slot = alloc_slot(target).expect("slot");
        assert!(in_reach(slot.as_ptr() as usize, target));
    }

    #[test]
    fn test_slots_are_distinct() {
        let target = test_slots_are_distinct as usize;
        let a = alloc_slot(target).unwrap().as_ptr() as usize;
        let b = alloc_slot(target).unwrap().as_ptr() as usize;
        let c = alloc_slot(target).unwrap().as_ptr() as usize;
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert!(a.abs_diff(b) >= SLOT_SIZE || b.abs_diff(c) >= SLOT_SIZE);
    }

    #[test]
    fn test_slots_are_writable_and_executable() {
        let target = test_slots_are_writable_and_executable as usize;
        let slot = alloc_slot(target).unwrap();
        unsafe {
            // mov eax, 0x2A; ret
            let code = [0xB8u8, 0x2A, 0x00, 0x00, 0x00, 0xC3];
            std::ptr::copy_nonoverlapping(code.as_ptr(), slot.as_ptr(), code.len());
            let f: extern "C" fn() -> u32 = std::mem::transmute(slot.as_ptr());
            assert_eq!(f(), 0x2A);
        }
    }
}
