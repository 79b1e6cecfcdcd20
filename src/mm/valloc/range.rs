//! Registro de uma faixa virtual contígua de um contexto.

use crate::mm::addr::PhysAddr;
use crate::mm::config::PAGE_SIZE;
use alloc::vec::Vec;
use bitflags::bitflags;

bitflags! {
    /// Flags de uma faixa virtual. PRESENT/WRITABLE/USER viram bits de
    /// PTE; o resto é software e só existe no registro do range.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmFlags: u32 {
        /// Acessível de ring 3.
        const USER = 1 << 0;
        /// Gravável.
        const WRITABLE = 1 << 1;
        /// Zerar o backing na alocação (eager).
        const ZERO = 1 << 2;
        /// Sem backing até o primeiro toque (page fault aloca e zera).
        const DEMAND_ZERO = 1 << 3;
        /// Não instala PTEs (registro puro).
        const NO_MAP = 1 << 4;
        /// Frames voltam ao PMM quando o range é liberado.
        const FREE_ON_RELEASE = 1 << 5;
        /// Duplicado em fork (cópia eager).
        const FORK_DUP = 1 << 6;
        /// Páginas emprestadas de outro contexto (map_across).
        const MAPPED_EXTERNAL = 1 << 7;
    }
}

/// Um pedaço de backing físico não-contíguo: página `page_index` do
/// range usa o frame `phys`.
#[derive(Debug, Clone, Copy)]
pub struct Shard {
    pub page_index: usize,
    pub phys: PhysAddr,
}

/// Backing físico de um range.
#[derive(Debug)]
pub enum Backing {
    /// Nenhum frame ainda (demand-zero puro).
    None,
    /// Run contíguo de frames começando em `PhysAddr`.
    Contig(PhysAddr),
    /// Lista de frames avulsos (demand-zero parcialmente tocado,
    /// map_across).
    Shards(Vec<Shard>),
}

/// Uma faixa de endereços virtuais com backing e flags uniformes.
#[derive(Debug)]
pub struct VirtRange {
    pub virt: usize,
    pub pages: usize,
    pub flags: VmFlags,
    pub backing: Backing,
}

impl VirtRange {
    pub fn end(&self) -> usize {
        self.virt + self.pages * PAGE_SIZE
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.virt && addr < self.end()
    }

    /// Frame que cobre a página `page_index`, se houver.
    pub fn phys_for_page(&self, page_index: usize) -> Option<PhysAddr> {
        match &self.backing {
            Backing::None => None,
            Backing::Contig(base) => Some(base.add(page_index * PAGE_SIZE)),
            Backing::Shards(shards) => shards
                .iter()
                .find(|s| s.page_index == page_index)
                .map(|s| s.phys),
        }
    }
}

/// Quantos registros cabem no pool de boot, usado na janela estreita em
/// que frames já existem mas o heap ainda não subiu.
pub const EARLY_RANGES: usize = 16;

/// Armazenamento da lista de ranges: pool fixo no boot, `Vec` depois.
#[derive(Debug)]
pub enum RangeStore {
    Early {
        slots: [Option<VirtRange>; EARLY_RANGES],
    },
    Heap(Vec<VirtRange>),
}

impl RangeStore {
    pub fn new_early() -> Self {
        Self::Early {
            slots: [const { None }; EARLY_RANGES],
        }
    }

    pub fn new_heap() -> Self {
        Self::Heap(Vec::new())
    }

    /// Migra o pool fixo para o heap assim que ele estiver pronto.
    fn migrate(&mut self) {
        if let Self::Early { slots } = self {
            if !crate::mm::heap::ready() {
                return;
            }
            let mut vec = Vec::with_capacity(EARLY_RANGES);
            for slot in slots.iter_mut() {
                if let Some(range) = slot.take() {
                    vec.push(range);
                }
            }
            *self = Self::Heap(vec);
        }
    }

    pub fn insert(&mut self, range: VirtRange) -> Result<(), ()> {
        self.migrate();
        match self {
            Self::Early { slots } => {
                for slot in slots.iter_mut() {
                    if slot.is_none() {
                        *slot = Some(range);
                        return Ok(());
                    }
                }
                // Pool esgotado antes do heap subir: erro de bring-up.
                Err(())
            }
            Self::Heap(vec) => {
                vec.push(range);
                Ok(())
            }
        }
    }

    /// Remove e devolve o range que começa em `virt`.
    pub fn remove_at(&mut self, virt: usize) -> Option<VirtRange> {
        match self {
            Self::Early { slots } => {
                for slot in slots.iter_mut() {
                    if slot.as_ref().is_some_and(|r| r.virt == virt) {
                        return slot.take();
                    }
                }
                None
            }
            Self::Heap(vec) => {
                let idx = vec.iter().position(|r| r.virt == virt)?;
                Some(vec.swap_remove(idx))
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &VirtRange> {
        let (early, heap) = match self {
            Self::Early { slots } => (Some(slots.iter()), None),
            Self::Heap(vec) => (None, Some(vec.iter())),
        };
        early
            .into_iter()
            .flatten()
            .filter_map(|s| s.as_ref())
            .chain(heap.into_iter().flatten())
    }

    pub fn find_containing(&self, addr: usize) -> Option<&VirtRange> {
        self.iter().find(|r| r.contains(addr))
    }

    pub fn find_containing_mut(&mut self, addr: usize) -> Option<&mut VirtRange> {
        match self {
            Self::Early { slots } => slots
                .iter_mut()
                .filter_map(|s| s.as_mut())
                .find(|r| r.contains(addr)),
            Self::Heap(vec) => vec.iter_mut().find(|r| r.contains(addr)),
        }
    }
}
