//! Interrupt Descriptor Table (IDT).
//!
//! 256 gates apontando para os stubs gerados em `stubs.rs`. Vetores
//! 0-31 são exceções da CPU, 32-47 IRQs remapeadas do PIC, 0x80 é o
//! gate de syscall (DPL 3 para ser alcançável de ring 3).

use core::arch::asm;
use core::mem::size_of;
use core::ptr::addr_of;

use super::gdt;
use super::stubs;

/// Vetor escolhido para syscalls.
pub const SYSCALL_VECTOR: usize = 0x80;

/// Entrada da IDT (Interrupt Gate de 32 bits).
#[derive(Clone, Copy)]
#[repr(C, packed)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    flags: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            flags: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32, dpl: u8) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector: gdt::KERNEL_CODE,
            zero: 0,
            // present | interrupt gate 32-bit | DPL
            flags: 0x8E | (dpl << 5),
            offset_high: (handler >> 16) as u16,
        }
    }
}

static mut IDT: [IdtEntry; 256] = [IdtEntry::missing(); 256];

#[repr(C, packed)]
struct DescriptorPointer {
    limit: u16,
    base: u32,
}

/// Preenche os 256 gates e carrega a IDT.
///
/// # Safety
/// Chamar uma única vez, depois da GDT e antes de habilitar interrupções.
pub unsafe fn init() {
    for (vector, entry) in IDT.iter_mut().enumerate() {
        let handler = stubs::stub_address(vector);
        // Somente o gate de syscall é alcançável de ring 3.
        let dpl = if vector == SYSCALL_VECTOR { 3 } else { 0 };
        *entry = IdtEntry::new(handler, dpl);
    }

    let pointer = DescriptorPointer {
        limit: (size_of::<IdtEntry>() * 256 - 1) as u16,
        base: addr_of!(IDT) as u32,
    };

    asm!("lidt [{}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
}
