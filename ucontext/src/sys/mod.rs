extern crate page_size;

cfg_if::cfg_if! {
    if #[cfg(target_family = "unix")] {
        mod unix;
        pub(crate) use unix::*;
    } else {
        compile_error!("ucontext only supports unix targets");
    }
}

use std::ptr::NonNull;

/// A coroutine stack
pub struct Stack {
    /// The total size of the stack (including the guard page)
    total_size: usize,
    /// The lowest usable address of the stack (null until allocated)
    bottom: *mut u8,
}

impl Drop for Stack {
    fn drop(&mut self) {
        if let Some(bottom) = NonNull::new(self.bottom) {
            stack_dealloc(self.total_size, Self::guard_size(), bottom);
        }
    }
}

impl Stack {
    /// Returns the system page allocation granularity
    #[inline(always)]
    pub fn page_size() -> usize {
        page_size::get_granularity()
    }

    /// Returns the guard size
    #[inline(always)]
    pub fn guard_size() -> usize {
        page_size::get_granularity()
    }

    #[inline(always)]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// The usable size, without the guard page
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.total_size - Self::guard_size()
    }

    #[inline(always)]
    pub fn is_allocated(&self) -> bool {
        !self.bottom.is_null()
    }

    #[inline(always)]
    pub(crate) fn bottom(&self) -> *mut u8 {
        self.bottom
    }
    #[inline(always)]
    pub(crate) fn top(&self) -> *mut u8 {
        unsafe { self.bottom.add(self.size()) }
    }

    /// Maps the stack memory and protects its guard page
    pub fn allocate(&mut self) -> std::io::Result<()> {
        assert!(self.bottom.is_null());
        let base = stack_alloc(self.total_size, Self::guard_size())?;
        self.bottom = base.as_ptr();
        log::trace!(
            "stack allocated, bottom:{:?}, top:{:?}",
            self.bottom(),
            self.top()
        );
        Ok(())
    }

    /// Returns an unallocated stack able to hold at least `size_hint` bytes
    ///
    /// The usable size is never below [`crate::min_stack_size`] and is rounded up
    /// to whole pages ; one guard page is added on top of it.
    pub fn with_size(mut size_hint: usize) -> Self {
        let guard_size = Self::guard_size();
        let page_align_mask = Self::page_size() - 1;
        size_hint = size_hint.max(crate::min_stack_size());
        size_hint = (size_hint + page_align_mask) & !page_align_mask;
        Self {
            total_size: size_hint + guard_size,
            bottom: std::ptr::null_mut(),
        }
    }

    /// Returns an unallocated stack with the default size
    pub fn new() -> Stack {
        Self::with_size(crate::DEFAULT_STACK_SIZE)
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_arch="x86", target_arch="x86_64", target_arch="aarch64"))] {
        /// Returns `true` when the stack growth downward
        #[inline(always)]
        pub const fn stack_growth_downward() -> bool {
            true
        }
    } else {
        #[inline(never)]
        fn __get_stack_growth_downward(prev_stack_data: *mut u8) -> bool {
            let mut data_on_stack = 0u8;
            (&mut data_on_stack as *mut u8 as usize) < (prev_stack_data as usize)
        }
        /// Returns `true` when the stack growth downward
        #[inline(never)]
        pub fn stack_growth_downward() -> bool {
            let mut data_on_stack = 0u8;
            __get_stack_growth_downward(&mut data_on_stack as _)
        }
    }
}
