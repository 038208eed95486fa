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
        std::arch::global_asm!(include_str!("asm/aarch64_aapcs_elf.S"));
    }
}

const FRAME_WORDS: usize = 22;
const SLOT_X19: usize = 0;
const SLOT_X20: usize = 1;
const SLOT_X30: usize = 11;

/// Writes the initial frame of a fresh context and returns its stack pointer.
///
/// The first swap to it loads `x19 = start_cb`, `x20 = start_arg` and returns
/// through `x30` into the boot trampoline.
pub(crate) fn setup_coroutine_on_stack(stack: &mut Stack, start_cb: StartCb, start_arg: usize) -> *mut () {
    debug_assert!(stack.is_allocated());
    unsafe {
        let top = (stack.top() as usize) & !15usize;
        // Leave 128 bytes at the top of the stack
        let sp = (top as *mut usize).sub(16 + FRAME_WORDS);
        for i in 0..FRAME_WORDS {
            sp.add(i).write(0);
        }
        sp.add(SLOT_X19).write(start_cb as *const () as usize);
        sp.add(SLOT_X20).write(start_arg);
        sp.add(SLOT_X30).write(__lazyco_uctx_asm_boot as *const () as usize);
        debug_assert_eq!(sp as usize % 16, 0);
        sp as *mut ()
    }
}
