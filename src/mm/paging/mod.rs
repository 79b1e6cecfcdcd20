//! Tabelas de página x86 de dois níveis.
//!
//! O diretório do kernel identity-mapeia `[0, IDENTITY_LIMIT)` em modo
//! supervisor e pré-aloca as tabelas da janela temporária
//! (`KERNEL_WINDOW_*`). Diretórios de usuário copiam esses PDEs, então
//! as tabelas do kernel são compartilhadas por todos os contextos:
//! alterar um PTE do kernel vale para todo mundo.

pub mod fault;

use crate::arch::Cpu;
use crate::core::handoff::BootInfo;
use crate::mm::addr::PhysAddr;
use crate::mm::config::{IDENTITY_LIMIT, KERNEL_WINDOW_BASE, KERNEL_WINDOW_END, PAGE_SIZE};
use crate::mm::pmm::FRAME_ALLOCATOR;
use bitflags::bitflags;
use core::sync::atomic::{AtomicUsize, Ordering};

bitflags! {
    /// Bits de hardware de PDE/PTE.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    OutOfMemory,
    NotMapped,
}

const ENTRIES: usize = 1024;
const ADDR_MASK: u32 = 0xFFFF_F000;

/// Diretório do kernel (endereço físico), definido no init.
static KERNEL_DIR: AtomicUsize = AtomicUsize::new(0);

/// Um diretório de páginas (nível 1). As tabelas (nível 2) são frames
/// alocados sob demanda do PMM, acessados pela região identity.
#[derive(Debug)]
pub struct PageDirectory {
    phys: PhysAddr,
}

impl PageDirectory {
    /// Diretório do kernel.
    pub fn kernel() -> Self {
        Self {
            phys: PhysAddr::new(KERNEL_DIR.load(Ordering::Relaxed)),
        }
    }

    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    fn entries(&self) -> *mut u32 {
        self.phys.as_mut_ptr::<u32>()
    }

    /// Novo diretório de usuário: PDEs do kernel copiados, resto vazio.
    pub fn new_user() -> Result<Self, PagingError> {
        let phys = alloc_table_frame()?;
        let dir = Self { phys };

        let kernel = Self::kernel();
        unsafe {
            for i in 0..ENTRIES {
                let kpde = *kernel.entries().add(i);
                *dir.entries().add(i) = kpde;
            }
        }
        Ok(dir)
    }

    /// Instala PTEs para `len` bytes a partir de `virt`, alocando
    /// tabelas conforme necessário.
    pub fn map(
        &self,
        virt: usize,
        phys: PhysAddr,
        len: usize,
        flags: PageFlags,
    ) -> Result<(), PagingError> {
        let pages = len.div_ceil(PAGE_SIZE);
        for i in 0..pages {
            self.map_page(virt + i * PAGE_SIZE, phys.add(i * PAGE_SIZE), flags)?;
        }
        Ok(())
    }

    /// Mapeia uma única página.
    pub fn map_page(
        &self,
        virt: usize,
        phys: PhysAddr,
        flags: PageFlags,
    ) -> Result<(), PagingError> {
        let pde_idx = virt >> 22;
        let pte_idx = (virt >> 12) & 0x3FF;

        unsafe {
            let pde_ptr = self.entries().add(pde_idx);
            let mut pde = *pde_ptr;

            if pde & PageFlags::PRESENT.bits() == 0 {
                let table = alloc_table_frame()?;
                // PDE sempre permissivo; a proteção fina fica nos PTEs.
                let mut pde_flags = PageFlags::PRESENT | PageFlags::WRITABLE;
                if virt < KERNEL_WINDOW_BASE && virt >= IDENTITY_LIMIT {
                    pde_flags |= PageFlags::USER;
                }
                pde = table.as_usize() as u32 | pde_flags.bits();
                *pde_ptr = pde;
            } else if flags.contains(PageFlags::USER) && pde & PageFlags::USER.bits() == 0 {
                *pde_ptr = pde | PageFlags::USER.bits();
                pde = *pde_ptr;
            }

            let table = (pde & ADDR_MASK) as usize as *mut u32;
            *table.add(pte_idx) = phys.as_usize() as u32 | flags.bits() | PageFlags::PRESENT.bits();
        }

        // As tabelas do kernel são compartilhadas entre diretórios: a
        // mudança pode estar visível no CR3 ativo mesmo quando `self`
        // não é o diretório carregado. Flush incondicional.
        Cpu::invlpg(virt);
        Ok(())
    }

    /// Limpa os PTEs de `len` bytes a partir de `virt`. As tabelas
    /// ficam alocadas.
    pub fn unmap(&self, virt: usize, len: usize) {
        let pages = len.div_ceil(PAGE_SIZE);
        for i in 0..pages {
            let addr = virt + i * PAGE_SIZE;
            let pde_idx = addr >> 22;
            let pte_idx = (addr >> 12) & 0x3FF;

            unsafe {
                let pde = *self.entries().add(pde_idx);
                if pde & PageFlags::PRESENT.bits() == 0 {
                    continue;
                }
                let table = (pde & ADDR_MASK) as usize as *mut u32;
                *table.add(pte_idx) = 0;
            }

            Cpu::invlpg(addr);
        }
    }

    /// Caminha as tabelas e traduz `virt` para físico.
    pub fn translate(&self, virt: usize) -> Option<PhysAddr> {
        let pde_idx = virt >> 22;
        let pte_idx = (virt >> 12) & 0x3FF;

        unsafe {
            let pde = *self.entries().add(pde_idx);
            if pde & PageFlags::PRESENT.bits() == 0 {
                return None;
            }
            let table = (pde & ADDR_MASK) as usize as *const u32;
            let pte = *table.add(pte_idx);
            if pte & PageFlags::PRESENT.bits() == 0 {
                return None;
            }
            Some(PhysAddr::new(
                (pte & ADDR_MASK) as usize + (virt & (PAGE_SIZE - 1)),
            ))
        }
    }

    /// Flags do PTE de `virt`, se presente.
    pub fn page_flags(&self, virt: usize) -> Option<PageFlags> {
        let pde_idx = virt >> 22;
        let pte_idx = (virt >> 12) & 0x3FF;

        unsafe {
            let pde = *self.entries().add(pde_idx);
            if pde & PageFlags::PRESENT.bits() == 0 {
                return None;
            }
            let table = (pde & ADDR_MASK) as usize as *const u32;
            let pte = *table.add(pte_idx);
            if pte & PageFlags::PRESENT.bits() == 0 {
                return None;
            }
            Some(PageFlags::from_bits_truncate(pte))
        }
    }

    /// Este diretório está carregado no CR3?
    pub fn is_active(&self) -> bool {
        Cpu::read_cr3() & ADDR_MASK as usize == self.phys.as_usize()
    }

    /// Carrega o CR3 se o contexto mudou (flush implícito do TLB).
    pub fn switch_to(&self) {
        if !self.is_active() {
            unsafe { Cpu::write_cr3(self.phys.as_usize()) };
        }
    }

    /// Libera as tabelas da área de usuário e o próprio diretório.
    /// Os frames mapeados pelos PTEs pertencem aos ranges do valloc e
    /// já foram liberados por eles.
    pub fn release_user_tables(&self) {
        let kernel = Self::kernel();
        let mut pmm = FRAME_ALLOCATOR.lock();

        unsafe {
            for i in 0..ENTRIES {
                let pde = *self.entries().add(i);
                let kpde = *kernel.entries().add(i);
                // Tabelas compartilhadas com o kernel não são nossas.
                if pde & PageFlags::PRESENT.bits() != 0 && pde != kpde {
                    pmm.free(PhysAddr::new((pde & ADDR_MASK) as usize), 1);
                }
            }
        }
        pmm.free(self.phys, 1);
    }
}

/// Aloca e zera um frame para tabela/diretório.
fn alloc_table_frame() -> Result<PhysAddr, PagingError> {
    let frame = FRAME_ALLOCATOR
        .lock()
        .alloc(1)
        .ok_or(PagingError::OutOfMemory)?;
    unsafe {
        core::ptr::write_bytes(frame.as_mut_ptr::<u8>(), 0, PAGE_SIZE);
    }
    Ok(frame)
}

/// Monta o diretório do kernel e liga paging.
///
/// # Safety
/// Chamar uma vez, depois do PMM, antes do heap.
pub unsafe fn init(boot: &BootInfo) {
    let dir_frame = alloc_table_frame().expect("sem frame para o diretório do kernel");
    KERNEL_DIR.store(dir_frame.as_usize(), Ordering::Relaxed);
    let dir = PageDirectory::kernel();

    // Identity map da RAM gerenciada, supervisor-only.
    let flags = PageFlags::WRITABLE;
    dir.map(0, PhysAddr::new(0), IDENTITY_LIMIT, flags)
        .expect("identity map falhou");

    // Pré-aloca as tabelas da janela do kernel (PTEs vazios). Como os
    // PDEs já existem antes de qualquer fork, todos os diretórios de
    // usuário compartilham estas tabelas.
    let mut addr = KERNEL_WINDOW_BASE;
    while addr < KERNEL_WINDOW_END {
        let pde_idx = addr >> 22;
        let pde_ptr = dir.entries().add(pde_idx);
        if *pde_ptr & PageFlags::PRESENT.bits() == 0 {
            let table = alloc_table_frame().expect("sem frame para tabela da janela");
            *pde_ptr =
                table.as_usize() as u32 | (PageFlags::PRESENT | PageFlags::WRITABLE).bits();
        }
        addr += ENTRIES * PAGE_SIZE;
    }

    // Framebuffer linear (MMIO): identity map supervisor para o
    // console externo e o panic.
    if let Some(fb) = boot.framebuffer {
        let fb_base = crate::klib::align_down(fb.addr as usize, PAGE_SIZE);
        let fb_len = (fb.pitch as usize * fb.height as usize) + PAGE_SIZE;
        if fb_base >= IDENTITY_LIMIT {
            dir.map(fb_base, PhysAddr::new(fb_base), fb_len, PageFlags::WRITABLE)
                .expect("map do framebuffer falhou");
        }
    }

    Cpu::write_cr3(dir.phys().as_usize());
    Cpu::enable_paging();

    crate::kinfo!(
        "paging",
        "ativo: identity até {:#x}, janela {:#x}..{:#x}",
        IDENTITY_LIMIT,
        KERNEL_WINDOW_BASE,
        KERNEL_WINDOW_END
    );
}
