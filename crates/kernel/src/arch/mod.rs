//! Architecture-specific trampolines: the minimal assembly needed to honour
//! the Cortex-M exception ABI, isolated behind a small interface so the
//! scheduler and syscall gate above it never touch a register directly.

mod cortex_m_asm;

pub use cortex_m_asm::{init_stack_frame, pend_context_switch};
