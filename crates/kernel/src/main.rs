//! Boot entry point.
//!
//! Brings up the heap, creates the idle thread and a demonstration
//! application thread, then starts the scheduler and parks the core to
//! let PendSV/SysTick/SVCall drive everything from here on. A concrete
//! board integration — SysTick reload configuration, a `printk` byte-sink,
//! a real host controller for [`usb::install_controller`] — is an external
//! collaborator this core does not supply; see the module docs on `heap`,
//! `lib::printk` and `usb::hc` for the boundary each one crosses.
#![no_std]
#![no_main]
#![feature(alloc_error_handler)]
// PendSV/SVCall's naked trampolines in `arch::cortex_m_asm` need this.
#![feature(naked_functions)]
// CI lint gate: when built with `--features strict`, fail on any warning
#![cfg_attr(feature = "strict", deny(warnings))]
#![cfg_attr(feature = "strict", deny(unsafe_op_in_unsafe_fn))]
// During early bringup, suppress warnings to keep logs clean
#![cfg_attr(all(feature = "bringup", not(feature = "strict")), allow(warnings))]

extern crate alloc;

// Core library (error handling, logging, the intrusive list)
#[allow(special_module_name)]
pub mod lib;
// Architecture trampolines: PendSV/SVCall/SysTick, context-switch asm
pub mod arch;
// Heap allocator backing both the global allocator and mm_alloc/mm_free
pub mod heap;
// mm_alloc/mm_free syscall bodies
pub mod mm;
// Preemptive multi-class scheduler
pub mod sched;
// Syscall gate: selector dispatch table
pub mod syscall;
// USB host enumeration engine
pub mod usb;

use cortex_m_rt::entry;
use sched::{scheduler_start, thread_create, ticks, ThreadInfo, CLASS_APPLICATION, CLASS_IDLE};

const IDLE_STACK_WORDS: usize = 64;
const DEMO_STACK_WORDS: usize = 256;

fn idle_entry(_arg: usize) {
    loop {
        cortex_m::asm::wfi();
    }
}

/// A small, harmless demonstration thread: logs once a tick and spins.
/// Stands in for whatever an application image would install at this
/// priority class; this core has no application loader of its own.
fn demo_entry(_arg: usize) {
    loop {
        crate::info!("demo: alive at tick {}", ticks());
        for _ in 0..200_000 {
            cortex_m::asm::nop();
        }
    }
}

#[entry]
fn main() -> ! {
    unsafe { heap::init_heap() };
    crate::info!("cmkernel: heap ready, creating boot threads");

    let idle = thread_create(&ThreadInfo {
        name: "idle",
        stack_words: IDLE_STACK_WORDS,
        entry: idle_entry,
        arg: 0,
        class: &CLASS_IDLE,
    })
    .expect("idle thread stack allocation failed");

    thread_create(&ThreadInfo {
        name: "demo",
        stack_words: DEMO_STACK_WORDS,
        entry: demo_entry,
        arg: 0,
        class: &CLASS_APPLICATION,
    })
    .expect("demo thread stack allocation failed");

    scheduler_start(idle);

    loop {
        cortex_m::asm::wfi();
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    crate::error!("panic: {}", info);
    loop {
        cortex_m::asm::wfi();
    }
}

#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    crate::error!("allocation error: {} bytes, align {}", layout.size(), layout.align());
    loop {
        cortex_m::asm::wfi();
    }
}
