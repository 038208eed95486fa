use std::ptr::NonNull;

#[cfg_attr(target_arch = "x86_64", path = "x86_64.rs")]
#[cfg_attr(target_arch = "aarch64", path = "aarch64.rs")]
pub(crate) mod asm;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("ucontext only supports x86_64 and aarch64");

cfg_if::cfg_if! {
    if #[cfg(not(any(
        target_os = "openbsd",
        target_os = "macos",
        target_os = "ios",
        target_os = "android",
        target_os = "illumos",
        target_os = "solaris"
    )))] {
        const MMAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANON;
    } else {
        const MMAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_STACK;
    }
}
const MMAP_PROT: libc::c_int = libc::PROT_READ | libc::PROT_WRITE;

/// Platform floor for a signal-safe stack
pub(crate) fn platform_min_stack_size() -> usize {
    libc::SIGSTKSZ
}

/// Maps `total_size` bytes and protects `guard_size` bytes past the growth end.
///
/// Returns the lowest usable address.
pub(crate) fn stack_alloc(total_size: usize, guard_size: usize) -> std::io::Result<NonNull<u8>> {
    let base = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            total_size,
            MMAP_PROT,
            MMAP_FLAGS,
            -1,
            0,
        )
    };

    if base == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    let mut bottom = base as *mut u8;
    let guard = if crate::sys::stack_growth_downward() {
        bottom = unsafe { bottom.add(guard_size) };
        base as *mut u8
    } else {
        unsafe { bottom.add(total_size - guard_size) }
    };
    if unsafe { libc::mprotect(guard as _, guard_size, libc::PROT_NONE) } < 0 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::munmap(base, total_size) };
        return Err(err);
    }
    Ok(unsafe { NonNull::new_unchecked(bottom) })
}

pub(crate) fn stack_dealloc(total_size: usize, guard_size: usize, bottom: NonNull<u8>) {
    let mut base = bottom.as_ptr();
    if crate::sys::stack_growth_downward() {
        base = unsafe { base.sub(guard_size) };
    }
    if unsafe { libc::munmap(base as _, total_size) } < 0 {
        log::warn!(
            "munmap of coroutine stack {:?} failed: {}",
            base,
            std::io::Error::last_os_error()
        );
    }
}
