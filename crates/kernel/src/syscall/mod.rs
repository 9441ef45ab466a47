//! System-call gate: the trap-selector dispatch table (component C).
//!
//! The architecture-specific half — decoding the selector out of the
//! faulting instruction and marshalling the hardware exception frame —
//! lives in [`gate`]. This module only owns the selector-to-handler table
//! and the handler bodies themselves.

pub mod gate;

use crate::lib::error::KernelError;

/// Trap selectors currently assigned. New syscalls are added by extending
/// this table, not by renumbering existing entries.
pub const SYS_SLEEP: u8 = 1;
pub const SYS_GPIO_TOGGLE: u8 = 2;
pub const SYS_MM_ALLOC: u8 = 3;
pub const SYS_MM_FREE: u8 = 4;

/// Dispatch one syscall given its selector and the four argument-register
/// slots from the exception frame. An unknown selector is silently
/// ignored, per this core's syscall error policy; only `mm_alloc` reports
/// a `KernelError` back to the caller (through a return-register slot the
/// gate would overwrite on success), since the others cannot fail for
/// the sole reason they'd need a `Result` for.
pub fn dispatch(selector: u8, a0: u32, a1: u32, a2: u32, a3: u32) -> Result<u32, KernelError> {
    let _ = (a2, a3);
    match selector {
        SYS_SLEEP => {
            sys_sleep(a0);
            Ok(0)
        }
        SYS_GPIO_TOGGLE => {
            sys_gpio_toggle(a0 as u8, a1 as u8);
            Ok(0)
        }
        SYS_MM_ALLOC => sys_mm_alloc(a0, a1),
        SYS_MM_FREE => {
            sys_mm_free(a0 as *mut u8);
            Ok(0)
        }
        other => {
            crate::warn!("syscall: unknown selector {}, ignored", other);
            Ok(0)
        }
    }
}

fn sys_sleep(ms: u32) {
    let Some(current) = crate::sched::scheduler::current_thread() else {
        return;
    };
    let ticks = ms_to_ticks(ms);
    crate::sched::scheduler::scheduler_enqueue_delay(current, ticks);
}

/// Ticks run at [`TICK_HZ`]; this converts a millisecond duration the
/// caller supplied into the scheduler's native unit.
pub const TICK_HZ: u32 = 1000;

fn ms_to_ticks(ms: u32) -> u64 {
    (ms as u64 * TICK_HZ as u64) / 1000
}

fn sys_gpio_toggle(port: u8, pin: u8) {
    crate::debug!("syscall: gpio_toggle(port={}, pin={}) — no board GPIO driver installed", port, pin);
}

fn sys_mm_alloc(size: u32, region: u32) -> Result<u32, KernelError> {
    let ptr = crate::mm::mm_alloc(size, region)?;
    Ok(ptr as u32)
}

fn sys_mm_free(ptr: *mut u8) {
    crate::mm::mm_free(ptr);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_selector_is_ignored_not_faulted() {
        let result = dispatch(200, 0, 0, 0, 0);
        assert_eq!(result, Ok(0));
    }

    #[test]
    fn ms_to_ticks_at_1khz_is_identity() {
        assert_eq!(ms_to_ticks(10), 10);
        assert_eq!(ms_to_ticks(0), 0);
    }
}
