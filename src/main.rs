//! Kernel Brasa — binário principal.
//!
//! Responsabilidade:
//! 1. Expor o header multiboot para o bootloader.
//! 2. Configurar a stack inicial.
//! 3. Saltar para `core::entry::kernel_main` (da biblioteca `brasa`).

#![no_std]
#![no_main]

use core::arch::global_asm;

// Importa a biblioteca do kernel (inclui o panic handler e o allocator).
extern crate alloc;
extern crate brasa;

// Stack de boot (16 KB). Vira a stack da task idle depois que o
// scheduler assume.
global_asm!(
    r#"
    .section .bss
    .align 16
    boot_stack_bottom:
    .skip 16384
    boot_stack_top:
    "#
);

// Header multiboot v1. Flags: ALIGN (módulos em 4K) | MEMINFO (mapa de
// memória obrigatório, validado de novo em kernel_main).
global_asm!(
    r#"
    .section .multiboot
    .align 4
    .long 0x1BADB002
    .long 0x00000003
    .long -(0x1BADB002 + 0x00000003)
    "#
);

// Trampolim de entrada. O bootloader deixa o magic em EAX e o ponteiro
// para a estrutura de informações em EBX. Interrupções chegam
// desabilitadas e paging desligado.
global_asm!(
    r#"
    .section .text._start
    .global _start
    .type _start, @function
    _start:
        cli
        mov esp, offset boot_stack_top
        xor ebp, ebp

        push ebx
        push eax
        call kernel_main

    2:
        cli
        hlt
        jmp 2b
    "#
);
