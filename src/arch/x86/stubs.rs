//! Stubs de entrada de interrupção (assembly).
//!
//! Cada vetor tem um stub minúsculo que empurra um error code falso
//! (quando a CPU não empurra um real), o número do vetor, e salta para
//! o caminho comum. O caminho comum salva o frame de registradores
//! uniforme (`interrupts::IrqFrame`), carrega os segmentos de kernel e
//! chama `interrupt_dispatch` com o ESP atual.
//!
//! O valor retornado pelo dispatcher vira o novo ESP: é assim que o
//! scheduler troca de task (cada task tem sua kernel stack com um frame
//! salvo no topo).

use core::arch::global_asm;

// Vetores em que a CPU empurra error code: 8, 10-14, 17.
global_asm!(
    r#"
    .altmacro

    .macro isr_stub n
    isr_\n:
    .if (\n == 8) | (\n == 10) | (\n == 11) | (\n == 12) | (\n == 13) | (\n == 14) | (\n == 17)
    .else
        push 0
    .endif
        push \n
        jmp isr_common
    .endm

    .section .text
    .set vec, 0
    .rept 256
        isr_stub %vec
        .set vec, vec + 1
    .endr

    isr_common:
        pusha
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
        call interrupt_dispatch
        mov esp, eax

        pop gs
        pop fs
        pop es
        pop ds
        popa
        add esp, 8
        iretd

    .macro stub_entry n
        .long isr_\n
    .endm

    .section .rodata
    .global ISR_STUB_TABLE
    .align 4
    ISR_STUB_TABLE:
    .set vec, 0
    .rept 256
        stub_entry %vec
        .set vec, vec + 1
    .endr
    "#
);

extern "C" {
    static ISR_STUB_TABLE: [u32; 256];
}

/// Endereço do stub do vetor `n`.
pub fn stub_address(n: usize) -> u32 {
    unsafe { ISR_STUB_TABLE[n] }
}
