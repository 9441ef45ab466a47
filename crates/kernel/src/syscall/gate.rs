//! The architecture-facing half of the syscall gate: decodes the trap
//! selector out of the SVC instruction itself and marshals the exception
//! frame into [`super::dispatch`].

/// Layout of the 8 words the hardware pushes on SVC entry, in ascending
/// address order. Matches the PendSV trampoline's hardware-frame layout;
/// the two exceptions share the same ABI.
#[repr(C)]
struct ExceptionFrame {
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

/// Entry point reached from `SVCall`'s naked trampoline with `r0` holding
/// the process stack pointer and `r1` holding `LR` (the `EXC_RETURN` value)
/// at the moment of the trap. `exc_return` is captured here, before any
/// Rust call below has a chance to overwrite the live `lr` register with an
/// ordinary return address, and is threaded explicitly back to
/// [`asm_return`] rather than trusted to still be sitting in `lr` by the
/// time this function is done.
///
/// # Safety
/// `psp` must point at a valid, hardware-pushed exception frame still on
/// the faulting thread's stack, and `exc_return` must be the `LR` value
/// live at exception entry.
#[no_mangle]
pub unsafe extern "C" fn svc_handler(psp: *mut u32, exc_return: u32) -> ! {
    let frame = &mut *(psp as *mut ExceptionFrame);

    // The SVC instruction is 16 bits; its low byte is the immediate
    // selector. `frame.pc` holds the address of the instruction *after*
    // the trap, so the trap itself is 2 bytes earlier.
    let svc_instruction = core::ptr::read_unaligned((frame.pc - 2) as *const u16);
    let selector = (svc_instruction & 0xff) as u8;

    let result = super::dispatch(selector, frame.r0, frame.r1, frame.r2, frame.r3);
    frame.r0 = match result {
        Ok(v) => v,
        Err(_) => {
            crate::error!("syscall: selector {} failed", selector);
            u32::MAX
        }
    };

    crate::arch::pend_context_switch();

    asm_return(psp, exc_return);
}

/// Returns from the exception using the `exc_return` value captured at
/// entry, not whatever happens to be in `lr` now. Split out of
/// `svc_handler` only so the `-> !` contract on the handler (it never falls
/// off the end; the trampoline takes care of resuming the thread) is
/// visible at the call site.
#[inline(always)]
unsafe fn asm_return(psp: *mut u32, exc_return: u32) -> ! {
    core::arch::asm!(
        "msr psp, {psp}",
        "bx {exc_return}",
        psp = in(reg) psp,
        exc_return = in(reg) exc_return,
        options(noreturn)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_decode_reads_low_byte_of_svc_immediate() {
        // `svc #3` encodes as 0xDF03 (little-endian bytes 03 DF); the low
        // byte of the halfword is the immediate regardless of endianness
        // once loaded into a u16 on a little-endian core.
        let svc_instruction: u16 = 0xDF03;
        let selector = (svc_instruction & 0xff) as u8;
        assert_eq!(selector, 3);
    }

    #[test]
    fn exception_frame_field_order_matches_hardware_push_order() {
        assert_eq!(core::mem::size_of::<ExceptionFrame>(), 8 * 4);
    }
}
