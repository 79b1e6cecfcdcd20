//! Global Descriptor Table + TSS.
//!
//! Layout fixo de segmentos flat:
//!
//! | Seletor | Uso            |
//! |---------|----------------|
//! | 0x08    | Código ring 0  |
//! | 0x10    | Dados ring 0   |
//! | 0x1B    | Código ring 3  |
//! | 0x23    | Dados ring 3   |
//! | 0x28    | TSS            |
//!
//! A TSS existe só para o campo `esp0`: a CPU troca para a kernel stack
//! da task atual quando uma interrupção chega em ring 3.

use core::arch::asm;
use core::mem::size_of;
use core::ptr::addr_of;

pub const KERNEL_CODE: u16 = 0x08;
pub const KERNEL_DATA: u16 = 0x10;
pub const USER_CODE: u16 = 0x1B;
pub const USER_DATA: u16 = 0x23;
pub const TSS_SELECTOR: u16 = 0x28;

/// Task State Segment (só usamos ss0/esp0 e o iomap).
#[repr(C, packed)]
struct Tss {
    link: u32,
    esp0: u32,
    ss0: u32,
    // Campos não usados por troca de contexto por software.
    unused: [u32; 22],
    iomap_base: u16,
    trap: u16,
}

static mut TSS: Tss = Tss {
    link: 0,
    esp0: 0,
    ss0: KERNEL_DATA as u32,
    unused: [0; 22],
    iomap_base: size_of::<Tss>() as u16,
    trap: 0,
};

/// Monta um descritor de segmento de 8 bytes.
const fn descriptor(base: u32, limit: u32, access: u8, flags: u8) -> u64 {
    let mut desc: u64 = 0;
    desc |= (limit & 0xFFFF) as u64;
    desc |= ((base & 0xFFFF) as u64) << 16;
    desc |= (((base >> 16) & 0xFF) as u64) << 32;
    desc |= (access as u64) << 40;
    desc |= (((limit >> 16) & 0xF) as u64) << 48;
    desc |= ((flags & 0xF) as u64) << 52;
    desc |= (((base >> 24) & 0xFF) as u64) << 56;
    desc
}

static mut GDT: [u64; 6] = [
    0,                                    // nulo
    descriptor(0, 0xFFFFF, 0x9A, 0xC),    // código ring 0
    descriptor(0, 0xFFFFF, 0x92, 0xC),    // dados ring 0
    descriptor(0, 0xFFFFF, 0xFA, 0xC),    // código ring 3
    descriptor(0, 0xFFFFF, 0xF2, 0xC),    // dados ring 3
    0,                                    // TSS (preenchido no init)
];

#[repr(C, packed)]
struct DescriptorPointer {
    limit: u16,
    base: u32,
}

/// Carrega a GDT, recarrega os seletores e ativa a TSS.
///
/// # Safety
/// Chamar uma única vez, no boot, antes de habilitar interrupções.
pub unsafe fn init() {
    let tss_base = addr_of!(TSS) as u32;
    let tss_limit = (size_of::<Tss>() - 1) as u32;
    GDT[5] = descriptor(tss_base, tss_limit, 0x89, 0x0);

    let pointer = DescriptorPointer {
        limit: (size_of::<u64>() * 6 - 1) as u16,
        base: addr_of!(GDT) as u32,
    };

    asm!(
        "lgdt [{ptr}]",
        // Recarrega CS com far return: empilha seletor + destino.
        "push 0x08",
        "lea eax, [2f]",
        "push eax",
        "retf",
        "2:",
        "mov ax, 0x10",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "mov ss, ax",
        "mov ax, 0x28",
        "ltr ax",
        ptr = in(reg) &pointer,
        out("eax") _,
    );
}

/// Define a kernel stack usada quando uma interrupção chega de ring 3.
pub fn set_kernel_stack(esp0: usize) {
    unsafe {
        core::ptr::addr_of_mut!(TSS.esp0).write_volatile(esp0 as u32);
    }
}
