//! Common ISR/IRQ entry stubs and dispatch.
//!
//! `InterruptFrame`'s field order is the Rust mirror of
//! `original_source/arch/x86/isr_dispatch.h`'s `struct isr_frame`
//! (gs/fs/es/ds, edi/esi/ebp/esp/ebx/edx/ecx/eax, vector, error_code,
//! eip/cs/eflags). The exception-vs-IRQ branch and the registered-handler
//! table follow spec section 4.3; the original's `isr_common_handler` is a
//! stripped placeholder that only logs exceptions, so the IRQ path (PIC
//! EOI, spurious filtering, handler registry) is built fresh here, in the
//! `lazy_static!`-backed registry shape the teacher uses for its own IDT
//! handler table.

use lazy_static::lazy_static;
use log::error;
use spin::Mutex;

use super::pic;

/// Register state captured by a stub before it calls into Rust. Field order
/// must match the push order in the assembly stubs below exactly.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterruptFrame {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,

    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,

    pub vector: u32,
    pub error_code: u32,

    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

pub type IrqHandler = fn(&InterruptFrame);

lazy_static! {
    static ref IRQ_HANDLERS: Mutex<[Option<IrqHandler>; 16]> = Mutex::new([None; 16]);
}

/// Read CR2, the faulting linear address latched by the CPU on a page
/// fault (vector 14).
fn read_cr2() -> u32 {
    let cr2: u32;
    // SAFETY: `mov` from CR2 only reads CPU state; no memory access.
    unsafe {
        core::arch::asm!("mov {0}, cr2", out(reg) cr2, options(nostack, preserves_flags));
    }
    cr2
}

/// Register a handler for IRQ line `line` (0..=15). Replaces any handler
/// already registered for that line.
pub fn register_irq_handler(line: u8, handler: IrqHandler) {
    IRQ_HANDLERS.lock()[line as usize] = Some(handler);
}

/// Entry point called by every assembly stub once it has pushed a full
/// `InterruptFrame` onto the stack.
///
/// # Safety
///
/// Must only be called by the stubs in this module with `frame` pointing at
/// a validly constructed `InterruptFrame` on the current stack.
#[no_mangle]
pub unsafe extern "C" fn isr_common_handler(frame: *mut InterruptFrame) {
    // SAFETY: the stub contract guarantees `frame` is valid for the
    // duration of this call.
    let frame = unsafe { &*frame };

    if frame.vector < 32 {
        let cr2 = if frame.vector == 14 { read_cr2() } else { 0 };
        error!(
            "[isr] exception vector={:#x} error={:#x}",
            frame.vector, frame.error_code
        );
        error!(
            "[isr] eip={:#x} cs={:#x} eflags={:#x} esp={:#x}",
            frame.eip, frame.cs, frame.eflags, frame.esp
        );
        error!(
            "[isr] eax={:#x} ebx={:#x} ecx={:#x} edx={:#x} esi={:#x} edi={:#x} ebp={:#x}",
            frame.eax, frame.ebx, frame.ecx, frame.edx, frame.esi, frame.edi, frame.ebp
        );
        error!(
            "[isr] ds={:#x} es={:#x} fs={:#x} gs={:#x}",
            frame.ds, frame.es, frame.fs, frame.gs
        );
        if frame.vector == 14 {
            error!("[isr] cr2={:#x}", cr2);
        }
        crate::bootstrap::halt_forever();
    }

    let irq = (frame.vector - 32) as u8;

    if (irq == 7 || irq == 15) && pic::is_spurious(irq) {
        if irq == 15 {
            // The cascade line was genuinely raised even though the slave
            // never latched its own interrupt; acknowledge the master only.
            pic::send_eoi(0);
        }
        return;
    }

    if let Some(handler) = IRQ_HANDLERS.lock()[irq as usize] {
        handler(frame);
    }

    pic::send_eoi(irq);
}

// ---------------------------------------------------------------------
// Assembly stubs
// ---------------------------------------------------------------------
//
// One stub per vector (0..=47). Vectors that don't push a CPU error code
// (everything except 8, 10-14, 17) push a dummy zero so `InterruptFrame`
// has a uniform layout. Each stub pushes the vector number, then the
// general-purpose registers and segment selectors in `InterruptFrame`'s
// field order (reversed, since `push` grows the frame downward and the
// struct is read back in increasing-address order), then calls the common
// handler and tears the frame back down before `iretd`.
core::arch::global_asm!(
    r#"
.macro isr_stub_noerr vec
.global isr_stub_\vec
isr_stub_\vec:
    push 0
    push \vec
    jmp isr_common_stub
.endm

.macro isr_stub_err vec
.global isr_stub_\vec
isr_stub_\vec:
    push \vec
    jmp isr_common_stub
.endm

isr_common_stub:
    push eax
    push ecx
    push edx
    push ebx
    push esp
    push ebp
    push esi
    push edi
    push ds
    push es
    push fs
    push gs

    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax

    push esp
    call isr_common_handler
    add esp, 4

    pop gs
    pop fs
    pop es
    pop ds
    pop edi
    pop esi
    pop ebp
    pop esp
    pop ebx
    pop edx
    pop ecx
    pop eax

    add esp, 8
    iretd

isr_stub_noerr 0
isr_stub_noerr 1
isr_stub_noerr 2
isr_stub_noerr 3
isr_stub_noerr 4
isr_stub_noerr 5
isr_stub_noerr 6
isr_stub_noerr 7
isr_stub_err   8
isr_stub_noerr 9
isr_stub_err   10
isr_stub_err   11
isr_stub_err   12
isr_stub_err   13
isr_stub_err   14
isr_stub_noerr 15
isr_stub_noerr 16
isr_stub_err   17
isr_stub_noerr 18
isr_stub_noerr 19
isr_stub_noerr 20
isr_stub_noerr 21
isr_stub_noerr 22
isr_stub_noerr 23
isr_stub_noerr 24
isr_stub_noerr 25
isr_stub_noerr 26
isr_stub_noerr 27
isr_stub_noerr 28
isr_stub_noerr 29
isr_stub_noerr 30
isr_stub_noerr 31
isr_stub_noerr 32
isr_stub_noerr 33
isr_stub_noerr 34
isr_stub_noerr 35
isr_stub_noerr 36
isr_stub_noerr 37
isr_stub_noerr 38
isr_stub_noerr 39
isr_stub_noerr 40
isr_stub_noerr 41
isr_stub_noerr 42
isr_stub_noerr 43
isr_stub_noerr 44
isr_stub_noerr 45
isr_stub_noerr 46
isr_stub_noerr 47
"#
);

extern "C" {
    fn isr_stub_0();
    fn isr_stub_1();
    fn isr_stub_2();
    fn isr_stub_3();
    fn isr_stub_4();
    fn isr_stub_5();
    fn isr_stub_6();
    fn isr_stub_7();
    fn isr_stub_8();
    fn isr_stub_9();
    fn isr_stub_10();
    fn isr_stub_11();
    fn isr_stub_12();
    fn isr_stub_13();
    fn isr_stub_14();
    fn isr_stub_15();
    fn isr_stub_16();
    fn isr_stub_17();
    fn isr_stub_18();
    fn isr_stub_19();
    fn isr_stub_20();
    fn isr_stub_21();
    fn isr_stub_22();
    fn isr_stub_23();
    fn isr_stub_24();
    fn isr_stub_25();
    fn isr_stub_26();
    fn isr_stub_27();
    fn isr_stub_28();
    fn isr_stub_29();
    fn isr_stub_30();
    fn isr_stub_31();
    fn isr_stub_32();
    fn isr_stub_33();
    fn isr_stub_34();
    fn isr_stub_35();
    fn isr_stub_36();
    fn isr_stub_37();
    fn isr_stub_38();
    fn isr_stub_39();
    fn isr_stub_40();
    fn isr_stub_41();
    fn isr_stub_42();
    fn isr_stub_43();
    fn isr_stub_44();
    fn isr_stub_45();
    fn isr_stub_46();
    fn isr_stub_47();
}

/// Install every stub into the IDT. Does not call [`super::idt::load`];
/// the bring-up orchestrator does that once PIC remapping has also run.
pub fn install_all_gates() {
    let stubs: [unsafe extern "C" fn(); 48] = [
        isr_stub_0, isr_stub_1, isr_stub_2, isr_stub_3, isr_stub_4, isr_stub_5, isr_stub_6,
        isr_stub_7, isr_stub_8, isr_stub_9, isr_stub_10, isr_stub_11, isr_stub_12, isr_stub_13,
        isr_stub_14, isr_stub_15, isr_stub_16, isr_stub_17, isr_stub_18, isr_stub_19,
        isr_stub_20, isr_stub_21, isr_stub_22, isr_stub_23, isr_stub_24, isr_stub_25,
        isr_stub_26, isr_stub_27, isr_stub_28, isr_stub_29, isr_stub_30, isr_stub_31,
        isr_stub_32, isr_stub_33, isr_stub_34, isr_stub_35, isr_stub_36, isr_stub_37,
        isr_stub_38, isr_stub_39, isr_stub_40, isr_stub_41, isr_stub_42, isr_stub_43,
        isr_stub_44, isr_stub_45, isr_stub_46, isr_stub_47,
    ];
    for (vector, stub) in stubs.iter().enumerate() {
        super::idt::set_gate(vector as u8, *stub as usize as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(vector: u32) -> InterruptFrame {
        InterruptFrame {
            gs: 0,
            fs: 0,
            es: 0,
            ds: 0,
            edi: 0,
            esi: 0,
            ebp: 0,
            esp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            vector,
            error_code: 0,
            eip: 0,
            cs: 0,
            eflags: 0,
        }
    }

    #[test]
    fn irq_vector_maps_to_irq_line() {
        let frame = make_frame(35);
        let irq = (frame.vector - 32) as u8;
        assert_eq!(irq, 3);
    }

    #[test]
    fn exception_vectors_are_below_32() {
        let frame = make_frame(13);
        assert!(frame.vector < 32);
    }

    #[test]
    fn handler_registry_round_trips() {
        fn noop(_f: &InterruptFrame) {}
        register_irq_handler(1, noop);
        assert!(IRQ_HANDLERS.lock()[1].is_some());
    }
}
