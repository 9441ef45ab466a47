//! Cortex-M assembly trampolines: the initial fake exception frame for a
//! newly created thread, and the PendSV-driven context switch.
//!
//! This is the one part of the kernel that is inherently
//! architecture-specific; everything above this module talks to threads
//! purely through `Tcb::stack_pointer()` / `set_stack_pointer()`.

use crate::sched::Tcb;
use cortex_m::peripheral::SCB;
use core::arch::asm;

/// Exception-frame fields the hardware pushes/pops automatically on
/// entry/exit: R0-R3, R12, LR, PC, xPSR, in that order from the bottom of
/// the frame.
const HW_FRAME_WORDS: usize = 8;
/// Callee-saved registers (R4-R11) the PendSV trampoline itself saves and
/// restores; these sit below the hardware frame on a thread's stack.
const SW_FRAME_WORDS: usize = 8;

const XPSR_THUMB_BIT: usize = 0x0100_0000;

/// Build the initial stack image for a thread that has never run, so the
/// PendSV trampoline can restore it exactly as if it had been preempted
/// mid-flight. Returns the stack pointer to store in the new TCB.
///
/// # Safety
/// `stack_top` must point one-past-the-end of a stack region at least
/// `(HW_FRAME_WORDS + SW_FRAME_WORDS) * size_of::<usize>()` bytes long, and
/// that region must not be in use.
pub unsafe fn init_stack_frame(stack_top: *mut usize, entry: fn(usize), arg: usize) -> *mut usize {
    let mut sp = stack_top.sub(HW_FRAME_WORDS);

    // Hardware frame, low address to high: R0, R1, R2, R3, R12, LR, PC, xPSR.
    sp.add(0).write(arg);
    sp.add(1).write(0);
    sp.add(2).write(0);
    sp.add(3).write(0);
    sp.add(4).write(0);
    sp.add(5).write(thread_exit as usize);
    sp.add(6).write((entry as usize) | 1); // set the Thumb bit
    sp.add(7).write(XPSR_THUMB_BIT);

    sp = sp.sub(SW_FRAME_WORDS);
    for i in 0..SW_FRAME_WORDS {
        sp.add(i).write(0);
    }
    sp
}

/// Where a thread entry function lands if it ever returns; entry functions
/// in this core are not expected to, so this just parks the core.
extern "C" fn thread_exit() -> ! {
    crate::error!("thread entry function returned; no supervisor for this in the current design");
    loop {
        cortex_m::asm::wfi();
    }
}

/// Request the pendable service call that performs the actual context
/// switch, without switching directly. Safe to call from any exception
/// priority at or above PendSV's (i.e. anywhere except PendSV itself).
pub fn pend_context_switch() {
    SCB::set_pendsv();
}

/// Rust-level half of the PendSV trampoline: given the stack pointer the
/// assembly just saved the outgoing thread's callee-saved registers onto,
/// run the scheduler's pick and return the incoming thread's stack
/// pointer for the assembly to restore from.
#[no_mangle]
extern "C" fn cmkernel_context_switch(outgoing_psp: *mut usize) -> *mut usize {
    let (outgoing, incoming) = crate::sched::scheduler::context_switch();
    unsafe { outgoing.set_stack_pointer(outgoing_psp) };
    incoming.stack_pointer()
}

/// The PendSV exception. Saves R4-R11 from the outgoing thread's process
/// stack, asks the scheduler (via [`cmkernel_context_switch`]) which
/// thread runs next, then restores R4-R11 from that thread's stack and
/// switches PSP to it. Must run at the lowest exception priority so it
/// never preempts the tick handler or the syscall gate.
#[no_mangle]
#[naked]
pub unsafe extern "C" fn PendSV() {
    asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "push {{lr}}",
        "bl {switch}",
        "pop {{lr}}",
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "bx lr",
        switch = sym cmkernel_context_switch,
        options(noreturn)
    );
}

/// The periodic scheduler timer. Configured by board bring-up (out of
/// scope for this core); this handler only needs to fire once per tick.
#[cortex_m_rt::exception]
fn SysTick() {
    crate::sched::scheduler::timer_tick();
}

/// Supervisor-call exception: the syscall gate's entry point. Unlike
/// PendSV this trampoline has no callee-saved registers of its own to
/// preserve across the call into Rust — but `lr` (the `EXC_RETURN` value)
/// still has to be captured here and handed off explicitly, since
/// [`crate::syscall::gate::svc_handler`] makes ordinary calls that clobber
/// the live `lr` before it would otherwise be needed again for `bx lr`.
#[no_mangle]
#[naked]
pub unsafe extern "C" fn SVCall() {
    asm!(
        "mrs r0, psp",
        "mov r1, lr",
        "b {handler}",
        handler = sym crate::syscall::gate::svc_handler,
        options(noreturn)
    );
}

#[allow(dead_code)]
fn _marker(_: &Tcb) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_frame_places_arg_and_entry_correctly() {
        let mut storage = [0usize; HW_FRAME_WORDS + SW_FRAME_WORDS];
        let top = unsafe { storage.as_mut_ptr().add(storage.len()) };

        fn dummy_entry(_: usize) {}

        let sp = unsafe { init_stack_frame(top, dummy_entry, 0xdead_beef) };
        let hw = unsafe { sp.add(SW_FRAME_WORDS) };
        unsafe {
            assert_eq!(*hw.add(0), 0xdead_beef); // R0 carries the argument
            assert_eq!(*hw.add(6) & !1, dummy_entry as usize & !1); // PC
            assert_eq!(*hw.add(7), XPSR_THUMB_BIT);
        }
    }
}
