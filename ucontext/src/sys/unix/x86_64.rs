use crate::sys::Stack;

pub(crate) type StartCb = unsafe extern "C" fn(usize) -> !;

unsafe extern "C" {
    unsafe fn __lazyco_uctx_asm_boot();
    pub(crate) unsafe fn __lazyco_uctx_asm_swap(save_sp: *mut *mut (), restore_sp: *mut ());
}

cfg_if::cfg_if! {
    if #[cfg(target_vendor = "apple")] {
        compile_error!("ucontext has no Mach-O context switch yet");
    } else {
        std::arch::global_asm!(include_str!("asm/x86_64_sysv_elf.S"));
    }
}

/// Writes the initial frame of a fresh context and returns its stack pointer.
///
/// The first swap to it pops six zeroed callee-saved registers then returns
/// into the boot trampoline, which pops `start_cb`/`start_arg` and jumps.
pub(crate) fn setup_coroutine_on_stack(stack: &mut Stack, start_cb: StartCb, start_arg: usize) -> *mut () {
    debug_assert!(stack.is_allocated());
    unsafe {
        let top = (stack.top() as usize) & !15usize;
        // Leave 128 bytes at the top of the stack
        let mut sp = (top as *mut usize).sub(16);
        // Null return address of `start_cb`, stops stack walks here
        sp = sp.sub(1);
        sp.write(0);
        sp = sp.sub(1);
        sp.write(start_arg);
        sp = sp.sub(1);
        sp.write(start_cb as *const () as usize);
        sp = sp.sub(1);
        sp.write(__lazyco_uctx_asm_boot as *const () as usize);
        // rbp, rbx, r12, r13, r14 and r15
        for _ in 0..6 {
            sp = sp.sub(1);
            sp.write(0);
        }
        // `start_cb` is entered with (rsp + 8) aligned on 16 bytes
        debug_assert_eq!((sp as usize + 9 * std::mem::size_of::<usize>()) % 16, 8);
        sp as *mut ()
    }
}
