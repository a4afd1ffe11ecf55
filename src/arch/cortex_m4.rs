//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements context switching via PendSV, SysTick timer
//! configuration, and interrupt management.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): Used by tasks in Thread mode
//!
//! On exception entry, the hardware automatically stacks R0–R3, R12, LR,
//! PC, and xPSR onto the process stack. The PendSV handler manually
//! saves and restores R4–R11, which completes the full context.
//!
//! ## Interrupt Priorities
//!
//! SysTick and PendSV both run at the lowest priority (0xFF). PendSV
//! therefore only ever runs once no other ISR is active, and the two
//! handlers cannot preempt each other — which is what lets the kernel's
//! ISR entry points touch the scheduler without taking the lock.

use core::arch::{asm, naked_asm};

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer for the scheduler tick.
///
/// `reload` is `cpu_freq_hz / tick_rate_hz`, taken from the kernel's
/// timing configuration. Each expiry raises `SysTick`, which advances
/// the logical clock.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST, reload: u32) {
    use cortex_m::peripheral::syst::SystClkSource;

    syst.set_reload(reload - 1);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Pend a PendSV exception to perform a context switch.
///
/// PendSV is the standard Cortex-M mechanism for deferred context
/// switching: it fires at the lowest priority, once no other ISR is
/// active. Sets the PENDSVSET bit in the Interrupt Control and State
/// Register (ICSR).
#[inline]
pub fn trigger_pendsv() {
    // ICSR address: 0xE000_ED04, PENDSVSET = bit 28
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Set PendSV and SysTick to the lowest interrupt priority.
///
/// Context switches must never preempt application ISRs, and the two
/// kernel handlers must be unable to preempt each other.
pub fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
        // Bits [23:16] = PendSV priority
        // Bits [31:24] = SysTick priority
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        let val = val | (0xFF << 16) | (0xFF << 24);
        core::ptr::write_volatile(shpr3, val);
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Start the first task by switching Thread mode onto the PSP and
/// branching to the task's entry point.
///
/// Called once from `kernel::start()`; never returns. The stack
/// pointer must address a fully initialized context frame built by
/// `dispatch::init_context`.
///
/// # Safety
/// Must only be called once, with a valid frame pointer, before any
/// PendSV has fired.
pub unsafe fn start_first_task(psp: *const u32) -> ! {
    asm!(
        // Skip the software-saved R4-R11 area (8 registers, 32 bytes)
        "adds r0, #32",
        "msr psp, r0",

        // Thread mode uses PSP from here on (CONTROL.SPSEL = 1)
        "movs r0, #2",
        "msr control, r0",
        "isb",

        // Unstack the hardware frame by hand; this is a launch, not an
        // exception return
        "pop {{r0-r3, r12}}",
        "pop {{r4}}", // LR slot (task_exit; tasks are noreturn)
        "pop {{r5}}", // PC — task entry point
        "pop {{r6}}", // xPSR slot

        "cpsie i",
        "bx r5",

        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler — the context-switch primitive.
///
/// ## Sequence
/// 1. Push R4–R11 onto the outgoing task's stack (PSP)
/// 2. Hand the stacked PSP to the kernel, which saves it in the
///    outgoing TCB and selects the next task
/// 3. Pop R4–R11 from the incoming task's stack
/// 4. Return from exception; hardware restores the rest of the frame
///
/// # Safety
/// Installed in the vector table by `cortex-m-rt`; follows the exact
/// Cortex-M4 exception entry/exit convention and must not be called
/// from software.
#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        // --- Save outgoing context ---
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",

        // --- Kernel decides; r0 in = stacked PSP, r0 out = next PSP ---
        "bl {switch}",

        // --- Restore incoming context ---
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",

        // Return to Thread mode on PSP (EXC_RETURN = 0xFFFFFFFD)
        "ldr r0, =0xFFFFFFFD",
        "bx r0",

        switch = sym switch_trampoline,
    );
}

/// Rust landing pad for the PendSV assembly: saves the outgoing stack
/// pointer, runs the selection, returns the incoming stack pointer.
///
/// # Safety
/// Called from PendSV only, with `psp` addressing the outgoing task's
/// stacked context.
unsafe extern "C" fn switch_trampoline(psp: *mut u32) -> *mut u32 {
    crate::kernel::isr_switch_context(psp)
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler — scheduler tick entry point.
///
/// Runs at the configured tick rate. Advancing the clock may pend a
/// PendSV, which tail-chains immediately after this handler.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    crate::kernel::isr_tick();
}
