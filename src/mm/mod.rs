//! Gerenciamento de memória.
//!
//! Quatro camadas, de baixo para cima:
//!
//! 1. `pmm`    — bitmap de frames físicos de 4 KiB.
//! 2. `paging` — diretórios/tabelas de página x86 e o handler de
//!    page fault.
//! 3. `valloc` — alocador virtual por contexto (bitmap de páginas +
//!    lista de ranges).
//! 4. `heap`   — alocador de blocos com header/footer, exposto como
//!    `GlobalAlloc`.
//!
//! Ordem de init: pmm → paging (identity map + CR3) → valloc (contexto
//! do kernel) → heap → handler de page fault.

pub mod addr;
pub mod config;
pub mod heap;
pub mod paging;
pub mod pmm;
pub mod valloc;

#[cfg(feature = "self_test")]
pub mod test;

use crate::core::handoff::BootInfo;

/// Bounds da imagem do kernel, definidos pelo linker script.
extern "C" {
    static __kernel_start: u8;
    static __kernel_end: u8;
}

pub fn kernel_image_bounds() -> (usize, usize) {
    unsafe {
        (
            core::ptr::addr_of!(__kernel_start) as usize,
            core::ptr::addr_of!(__kernel_end) as usize,
        )
    }
}

/// Inicializa todo o subsistema de memória.
///
/// # Safety
/// Chamar uma única vez no boot, com o handoff já validado.
pub unsafe fn init(boot: &BootInfo) {
    pmm::init(boot);
    paging::init(boot);
    // valloc antes do heap: o registro da região do heap usa o pool
    // fixo de ranges de boot.
    valloc::init_kernel();
    heap::init(boot);
    paging::fault::init();

    let (total, free) = heap::stats();
    crate::kinfo!("mm", "heap pronto: {} KiB total, {} KiB livres", total / 1024, free / 1024);
}
