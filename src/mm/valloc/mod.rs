//! # Alocador virtual por contexto
//!
//! Cada task (e o kernel) tem um `AddressSpace`: um diretório de
//! páginas, um bitmap de uso cobrindo os 4 GiB em granularidade de
//! página e a lista de ranges (`VirtRange`).
//!
//! Invariantes:
//! - nenhum par de ranges do mesmo contexto se sobrepõe em virtual;
//! - na região dinâmica, todo bit setado do bitmap é coberto por
//!   exatamente um range (as áreas fixas — identity do kernel, baixa
//!   de usuário — são pré-marcadas como usadas sem range);
//! - as entradas do diretório concordam com os ranges, exceto quando o
//!   range é `NO_MAP` ou `DEMAND_ZERO` ainda não tocado.
//!
//! O lock é por contexto; `map_across` adquire os dois locks em ordem
//! fixa de ponteiro para evitar deadlock AB/BA. No boot existe um pool
//! fixo de registros de range (`RangeStore::Early`) para a janela em
//! que frames já funcionam mas o heap ainda não.

pub mod range;

pub use range::{Backing, Shard, VirtRange, VmFlags};

use crate::klib::align_down;
use crate::klib::bitmap::Bitmap;
use crate::mm::addr::PhysAddr;
use crate::mm::config::{
    IDENTITY_LIMIT, KERNEL_WINDOW_BASE, KERNEL_WINDOW_END, PAGE_SIZE, USER_MIN, USER_MMAP_BASE,
};
use crate::mm::paging::{PageDirectory, PageFlags};
use crate::mm::pmm::FRAME_ALLOCATOR;
use crate::sync::Spinlock;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use range::RangeStore;

/// Páginas em 4 GiB.
const TOTAL_PAGES: usize = 1 << 20;
const BITMAP_WORDS: usize = TOTAL_PAGES / 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Sem espaço virtual contíguo.
    OutOfVirtual,
    /// Sem frames físicos.
    OutOfMemory,
    /// Faixa pedida colide com range existente.
    Overlap,
    /// Endereço não pertence a range nenhum.
    NotFound,
    /// Pool de boot esgotado antes do heap subir.
    EarlyPool,
}

/// Resumo devolvido por `reserve`.
#[derive(Debug, Clone, Copy)]
pub struct Reserved {
    pub virt: usize,
    pub pages: usize,
    pub phys: Option<PhysAddr>,
}

/// Storage do bitmap: estático para o contexto do kernel, heap para os
/// contextos de usuário.
enum BitmapStore {
    Fixed(&'static mut [u32]),
    Heap(Box<[u32]>),
}

impl BitmapStore {
    fn words(&mut self) -> &mut [u32] {
        match self {
            Self::Fixed(w) => w,
            Self::Heap(b) => b,
        }
    }

    fn words_ref(&self) -> &[u32] {
        match self {
            Self::Fixed(w) => w,
            Self::Heap(b) => b,
        }
    }
}

struct AspaceInner {
    dir: PageDirectory,
    bitmap: BitmapStore,
    ranges: RangeStore,
    alloc_hint: usize,
}

impl AspaceInner {
    fn hw_flags(flags: VmFlags) -> PageFlags {
        let mut hw = PageFlags::empty();
        if flags.contains(VmFlags::WRITABLE) {
            hw |= PageFlags::WRITABLE;
        }
        if flags.contains(VmFlags::USER) {
            hw |= PageFlags::USER;
        }
        hw
    }

    fn bits_free(&mut self, first: usize, pages: usize) -> bool {
        let bm = Bitmap::new(self.bitmap.words(), TOTAL_PAGES);
        for page in first..first + pages {
            if bm.get(page) {
                return false;
            }
        }
        true
    }

    fn set_bits(&mut self, first: usize, pages: usize, value: bool) {
        let mut bm = Bitmap::new(self.bitmap.words(), TOTAL_PAGES);
        bm.set_range(first, pages, value);
    }

    /// Acha e marca `pages` páginas livres a partir do hint.
    fn claim_run(&mut self, pages: usize) -> Result<usize, AllocError> {
        let hint = self.alloc_hint;
        let bm = Bitmap::new(self.bitmap.words(), TOTAL_PAGES);
        let first = match bm.find_run_from(hint, pages) {
            Some(f) => f,
            None => bm
                .find_run_from(0, pages)
                .ok_or(AllocError::OutOfVirtual)?,
        };
        self.set_bits(first, pages, true);
        Ok(first)
    }

    fn reserve(
        &mut self,
        pages: usize,
        virt_req: Option<usize>,
        phys_req: Option<PhysAddr>,
        mut flags: VmFlags,
    ) -> Result<Reserved, AllocError> {
        if pages == 0 {
            return Err(AllocError::OutOfVirtual);
        }

        let first = match virt_req {
            Some(v) => {
                let first = align_down(v, PAGE_SIZE) / PAGE_SIZE;
                if !self.bits_free(first, pages) {
                    return Err(AllocError::Overlap);
                }
                self.set_bits(first, pages, true);
                first
            }
            None => self.claim_run(pages)?,
        };
        let virt = first * PAGE_SIZE;

        // Backing físico.
        let backing = if flags.contains(VmFlags::DEMAND_ZERO) {
            Backing::None
        } else {
            let phys = match phys_req {
                Some(p) => p,
                None => {
                    // Frames que nós mesmos alocamos voltam ao PMM na
                    // liberação.
                    flags |= VmFlags::FREE_ON_RELEASE;
                    match FRAME_ALLOCATOR.lock().alloc(pages) {
                        Some(p) => p,
                        None => {
                            self.set_bits(first, pages, false);
                            return Err(AllocError::OutOfMemory);
                        }
                    }
                }
            };
            Backing::Contig(phys)
        };

        // Instala PTEs.
        if !flags.contains(VmFlags::NO_MAP) {
            if let Backing::Contig(phys) = &backing {
                if self
                    .dir
                    .map(virt, *phys, pages * PAGE_SIZE, Self::hw_flags(flags))
                    .is_err()
                {
                    self.rollback(first, pages, &backing, flags);
                    return Err(AllocError::OutOfMemory);
                }
            }
        }

        // Zera pela região identity (todo frame do PMM é visível lá).
        if flags.contains(VmFlags::ZERO) {
            if let Backing::Contig(phys) = &backing {
                unsafe {
                    core::ptr::write_bytes(phys.as_mut_ptr::<u8>(), 0, pages * PAGE_SIZE);
                }
            }
        }

        let phys_out = match &backing {
            Backing::Contig(p) => Some(*p),
            _ => None,
        };

        let range = VirtRange {
            virt,
            pages,
            flags,
            backing,
        };
        if self.ranges.insert(range).is_err() {
            self.set_bits(first, pages, false);
            return Err(AllocError::EarlyPool);
        }

        Ok(Reserved {
            virt,
            pages,
            phys: phys_out,
        })
    }

    fn rollback(&mut self, first: usize, pages: usize, backing: &Backing, flags: VmFlags) {
        self.set_bits(first, pages, false);
        if flags.contains(VmFlags::FREE_ON_RELEASE) {
            if let Backing::Contig(phys) = backing {
                FRAME_ALLOCATOR.lock().free(*phys, pages);
            }
        }
    }

    fn release(&mut self, virt: usize) -> Result<(), AllocError> {
        let range = self.ranges.remove_at(virt).ok_or(AllocError::NotFound)?;

        self.set_bits(range.virt / PAGE_SIZE, range.pages, false);

        if !range.flags.contains(VmFlags::NO_MAP) {
            self.dir.unmap(range.virt, range.pages * PAGE_SIZE);
        }

        if range.flags.contains(VmFlags::FREE_ON_RELEASE) {
            let mut pmm = FRAME_ALLOCATOR.lock();
            match &range.backing {
                Backing::Contig(phys) => pmm.free(*phys, range.pages),
                Backing::Shards(shards) => {
                    for shard in shards {
                        pmm.free(shard.phys, 1);
                    }
                }
                Backing::None => {}
            }
        }
        Ok(())
    }

    /// Garante backing da página que cobre `addr` (demand-zero).
    fn ensure_backed(&mut self, addr: usize) -> Option<PhysAddr> {
        let (range_virt, flags) = {
            let range = self.ranges.find_containing(addr)?;
            (range.virt, range.flags)
        };
        let page_index = (addr - range_virt) / PAGE_SIZE;

        if let Some(phys) = self
            .ranges
            .find_containing(addr)
            .and_then(|r| r.phys_for_page(page_index))
        {
            return Some(phys);
        }

        if !flags.contains(VmFlags::DEMAND_ZERO) {
            return None;
        }

        let frame = FRAME_ALLOCATOR.lock().alloc(1)?;
        // Zera pela janela temporária do kernel: válido em qualquer
        // contexto, mesmo com CR3 de usuário carregado.
        kernel_zero_frame(frame);

        let virt = range_virt + page_index * PAGE_SIZE;
        if self
            .dir
            .map_page(virt, frame, Self::hw_flags(flags))
            .is_err()
        {
            FRAME_ALLOCATOR.lock().free(frame, 1);
            return None;
        }

        let range = self.ranges.find_containing_mut(addr)?;
        match &mut range.backing {
            Backing::Shards(shards) => shards.push(Shard { page_index, phys: frame }),
            b @ Backing::None => {
                *b = Backing::Shards(vec![Shard {
                    page_index,
                    phys: frame,
                }])
            }
            Backing::Contig(_) => {}
        }
        Some(frame)
    }

    /// Resolve um page fault. `true` se a execução pode continuar.
    fn handle_fault(&mut self, addr: usize, write: bool, present: bool) -> bool {
        let Some(range) = self.ranges.find_containing(addr) else {
            return false;
        };
        let flags = range.flags;
        let range_virt = range.virt;

        // Página demand-zero ainda sem backing.
        if !present && flags.contains(VmFlags::DEMAND_ZERO) {
            return self.ensure_backed(addr).is_some();
        }

        // Escrita em página write-protected de um range gravável:
        // frame compartilhado, troca por cópia privada.
        if present && write && flags.contains(VmFlags::WRITABLE) {
            let page_index = (addr - range_virt) / PAGE_SIZE;
            let virt_page = range_virt + page_index * PAGE_SIZE;

            let Some(old_phys) = self.dir.translate(virt_page) else {
                return false;
            };
            let already_writable = self
                .dir
                .page_flags(virt_page)
                .is_some_and(|f| f.contains(PageFlags::WRITABLE));
            if already_writable {
                return false;
            }

            let Some(new_frame) = FRAME_ALLOCATOR.lock().alloc(1) else {
                return false;
            };
            unsafe {
                core::ptr::copy_nonoverlapping(
                    align_down(old_phys.as_usize(), PAGE_SIZE) as *const u8,
                    new_frame.as_mut_ptr::<u8>(),
                    PAGE_SIZE,
                );
            }
            if self
                .dir
                .map_page(virt_page, new_frame, Self::hw_flags(flags))
                .is_err()
            {
                FRAME_ALLOCATOR.lock().free(new_frame, 1);
                return false;
            }

            if let Some(range) = self.ranges.find_containing_mut(addr) {
                if let Backing::Shards(shards) = &mut range.backing {
                    if let Some(shard) = shards.iter_mut().find(|s| s.page_index == page_index) {
                        shard.phys = new_frame;
                    }
                }
            }
            return true;
        }

        false
    }

    /// Todas as páginas de `[addr, addr+len)` pertencem a ranges USER
    /// (e graváveis, se `write`)?
    fn user_range_ok(&self, addr: usize, len: usize, write: bool) -> bool {
        if len == 0 {
            return true;
        }
        let end = match addr.checked_add(len) {
            Some(e) => e,
            None => return false,
        };

        let mut page = align_down(addr, PAGE_SIZE);
        while page < end {
            match self.ranges.find_containing(page) {
                Some(r)
                    if r.flags.contains(VmFlags::USER)
                        && (!write || r.flags.contains(VmFlags::WRITABLE)) => {}
                _ => return false,
            }
            page += PAGE_SIZE;
        }
        true
    }

    /// (páginas marcadas, páginas totais do bitmap)
    fn stats(&self) -> (usize, usize) {
        let mut used = 0usize;
        for &word in self.bitmap.words_ref() {
            used += word.count_ones() as usize;
        }
        (used, TOTAL_PAGES)
    }
}

/// Espaço de endereçamento com lock próprio.
pub struct AddressSpace {
    inner: Spinlock<AspaceInner>,
}

pub type AspaceRef = Arc<AddressSpace>;

impl AddressSpace {
    /// Cria um contexto de usuário novo: diretório com os PDEs do
    /// kernel, bitmap no heap com as áreas fixas pré-marcadas.
    pub fn new_user() -> Result<AspaceRef, AllocError> {
        let dir = PageDirectory::new_user().map_err(|_| AllocError::OutOfMemory)?;

        let mut words = vec![0u32; BITMAP_WORDS].into_boxed_slice();
        {
            let mut bm = Bitmap::new(&mut words, TOTAL_PAGES);
            // Área do kernel (identity + baixa) e janela: fora do
            // alcance do usuário.
            bm.set_range(0, USER_MIN / PAGE_SIZE, true);
            bm.set_range(
                KERNEL_WINDOW_BASE / PAGE_SIZE,
                (usize::MAX - KERNEL_WINDOW_BASE) / PAGE_SIZE + 1,
                true,
            );
        }

        Ok(Arc::new(Self {
            inner: Spinlock::new(AspaceInner {
                dir,
                bitmap: BitmapStore::Heap(words),
                ranges: RangeStore::new_heap(),
                alloc_hint: USER_MMAP_BASE / PAGE_SIZE,
            }),
        }))
    }

    pub fn reserve(
        &self,
        pages: usize,
        virt_req: Option<usize>,
        phys_req: Option<PhysAddr>,
        flags: VmFlags,
    ) -> Result<Reserved, AllocError> {
        self.inner.lock().reserve(pages, virt_req, phys_req, flags)
    }

    pub fn release(&self, virt: usize) -> Result<(), AllocError> {
        self.inner.lock().release(virt)
    }

    pub fn translate(&self, virt: usize) -> Option<PhysAddr> {
        self.inner.lock().dir.translate(virt)
    }

    pub fn handle_fault(&self, addr: usize, write: bool, present: bool) -> bool {
        self.inner.lock().handle_fault(addr, write, present)
    }

    pub fn user_range_ok(&self, addr: usize, len: usize, write: bool) -> bool {
        self.inner.lock().user_range_ok(addr, len, write)
    }

    pub fn dir_phys(&self) -> PhysAddr {
        self.inner.lock().dir.phys()
    }

    pub fn switch_to(&self) {
        self.inner.lock().dir.switch_to();
    }

    pub fn stats(&self) -> (usize, usize) {
        self.inner.lock().stats()
    }

    /// Duplicação eager para fork: todo range `FORK_DUP` é copiado
    /// byte a byte para frames novos do filho.
    pub fn fork(&self) -> Result<AspaceRef, AllocError> {
        let child = Self::new_user()?;
        let parent = self.inner.lock();
        let mut child_inner = child.inner.lock();

        let result = Self::fork_ranges(&parent, &mut child_inner);

        drop(child_inner);
        drop(parent);

        if let Err(e) = result {
            child.release_all();
            return Err(e);
        }
        Ok(child)
    }

    fn fork_ranges(
        parent: &AspaceInner,
        child_inner: &mut AspaceInner,
    ) -> Result<(), AllocError> {
        for range in parent.ranges.iter() {
            if !range.flags.contains(VmFlags::FORK_DUP) {
                continue;
            }

            let first = range.virt / PAGE_SIZE;
            child_inner.set_bits(first, range.pages, true);

            let hw = AspaceInner::hw_flags(range.flags);
            let backing = match &range.backing {
                Backing::None => Backing::None,
                Backing::Contig(src_phys) => {
                    let dst_phys = FRAME_ALLOCATOR
                        .lock()
                        .alloc(range.pages)
                        .ok_or(AllocError::OutOfMemory)?;
                    unsafe {
                        core::ptr::copy_nonoverlapping(
                            src_phys.as_mut_ptr::<u8>() as *const u8,
                            dst_phys.as_mut_ptr::<u8>(),
                            range.pages * PAGE_SIZE,
                        );
                    }
                    child_inner
                        .dir
                        .map(range.virt, dst_phys, range.pages * PAGE_SIZE, hw)
                        .map_err(|_| AllocError::OutOfMemory)?;
                    Backing::Contig(dst_phys)
                }
                Backing::Shards(shards) => {
                    let mut new_shards = Vec::with_capacity(shards.len());
                    for shard in shards {
                        let dst = FRAME_ALLOCATOR
                            .lock()
                            .alloc(1)
                            .ok_or(AllocError::OutOfMemory)?;
                        unsafe {
                            core::ptr::copy_nonoverlapping(
                                shard.phys.as_mut_ptr::<u8>() as *const u8,
                                dst.as_mut_ptr::<u8>(),
                                PAGE_SIZE,
                            );
                        }
                        child_inner
                            .dir
                            .map_page(range.virt + shard.page_index * PAGE_SIZE, dst, hw)
                            .map_err(|_| AllocError::OutOfMemory)?;
                        new_shards.push(Shard {
                            page_index: shard.page_index,
                            phys: dst,
                        });
                    }
                    Backing::Shards(new_shards)
                }
            };

            let new_range = VirtRange {
                virt: range.virt,
                pages: range.pages,
                flags: range.flags,
                backing,
            };
            child_inner
                .ranges
                .insert(new_range)
                .map_err(|_| AllocError::EarlyPool)?;
        }
        Ok(())
    }

    /// Libera tudo: ranges (devolvendo frames `FREE_ON_RELEASE`) e as
    /// tabelas de usuário do diretório. Chamado pelo reap do wait.
    pub fn release_all(&self) {
        let mut inner = self.inner.lock();

        let starts: Vec<usize> = inner.ranges.iter().map(|r| r.virt).collect();
        for virt in starts {
            let _ = inner.release(virt);
        }
        inner.dir.release_user_tables();
    }
}

// =========================================================================
// Contexto do kernel
// =========================================================================

static mut KERNEL_BITMAP_WORDS: [u32; BITMAP_WORDS] = [0; BITMAP_WORDS];

static KERNEL_ASPACE: Spinlock<Option<AspaceInner>> = Spinlock::new(None);

/// Monta o contexto do kernel. Só a janela temporária fica disponível
/// para reservas dinâmicas; identity e espaço de usuário são marcados
/// como fora de alcance.
pub fn init_kernel() {
    let words: &'static mut [u32] =
        unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_BITMAP_WORDS) };

    {
        let mut bm = Bitmap::new(&mut *words, TOTAL_PAGES);
        bm.fill(true);
        bm.set_range(
            KERNEL_WINDOW_BASE / PAGE_SIZE,
            (KERNEL_WINDOW_END - KERNEL_WINDOW_BASE) / PAGE_SIZE,
            false,
        );
    }

    let mut inner = AspaceInner {
        dir: PageDirectory::kernel(),
        bitmap: BitmapStore::Fixed(words),
        ranges: RangeStore::new_early(),
        alloc_hint: KERNEL_WINDOW_BASE / PAGE_SIZE,
    };

    // Registra a imagem do kernel como range (contabilidade; usa o
    // pool de boot, o heap ainda não subiu).
    let (kstart, kend) = crate::mm::kernel_image_bounds();
    let kpages = (kend - align_down(kstart, PAGE_SIZE)).div_ceil(PAGE_SIZE);
    let _ = inner.ranges.insert(VirtRange {
        virt: align_down(kstart, PAGE_SIZE),
        pages: kpages,
        flags: VmFlags::NO_MAP,
        backing: Backing::Contig(PhysAddr::new(align_down(kstart, PAGE_SIZE))),
    });

    *KERNEL_ASPACE.lock() = Some(inner);
    crate::kinfo!("valloc", "contexto do kernel pronto (janela de {} MiB)",
        (KERNEL_WINDOW_END - KERNEL_WINDOW_BASE) / (1024 * 1024));
}

/// Registra uma faixa identity já mapeada (ex.: região do heap) na
/// lista de ranges do kernel.
pub fn kernel_adopt_range(virt: usize, pages: usize, flags: VmFlags) {
    let mut guard = KERNEL_ASPACE.lock();
    if let Some(inner) = guard.as_mut() {
        let _ = inner.ranges.insert(VirtRange {
            virt,
            pages,
            flags: flags | VmFlags::NO_MAP,
            backing: Backing::Contig(PhysAddr::new(virt)),
        });
    }
}

/// Mapeia `pages` frames a partir de `phys` na janela do kernel.
pub fn kernel_window_map(phys: PhysAddr, pages: usize) -> Option<usize> {
    let mut guard = KERNEL_ASPACE.lock();
    let inner = guard.as_mut()?;
    inner
        .reserve(pages, None, Some(phys), VmFlags::WRITABLE)
        .ok()
        .map(|r| r.virt)
}

pub fn kernel_window_unmap(virt: usize) {
    let mut guard = KERNEL_ASPACE.lock();
    if let Some(inner) = guard.as_mut() {
        let _ = inner.release(virt);
    }
}

/// Zera um frame pela janela temporária.
pub fn kernel_zero_frame(frame: PhysAddr) {
    match kernel_window_map(frame, 1) {
        Some(virt) => {
            unsafe {
                core::ptr::write_bytes(virt as *mut u8, 0, PAGE_SIZE);
            }
            kernel_window_unmap(virt);
        }
        None => {
            // Janela esgotada: o frame é identity-visível de qualquer
            // forma.
            unsafe {
                core::ptr::write_bytes(frame.as_mut_ptr::<u8>(), 0, PAGE_SIZE);
            }
        }
    }
}

// =========================================================================
// map_across
// =========================================================================

/// Mapeia, de forma transparente, páginas já presentes em `src` dentro
/// de `dst`, num endereço virtual recém-alocado. Endereços de origem
/// não-alinhados funcionam: aloca-se páginas suficientes para cobrir o
/// transbordo e o offset intra-página é preservado no retorno.
pub fn map_across(
    dst: &AspaceRef,
    src: &AspaceRef,
    src_addr: usize,
    size: usize,
    flags: VmFlags,
) -> Result<usize, AllocError> {
    let src_aligned = align_down(src_addr, PAGE_SIZE);
    let offset = src_addr - src_aligned;
    let pages = (size + offset).div_ceil(PAGE_SIZE);

    if Arc::ptr_eq(dst, src) {
        let mut inner = dst.inner.lock();
        return map_across_inner(&mut inner, None, src_aligned, offset, pages, flags);
    }

    // Ordem fixa de aquisição: ponteiro menor primeiro.
    let dst_ptr = Arc::as_ptr(dst) as usize;
    let src_ptr = Arc::as_ptr(src) as usize;

    if dst_ptr < src_ptr {
        let mut d = dst.inner.lock();
        let mut s = src.inner.lock();
        map_across_inner(&mut d, Some(&mut s), src_aligned, offset, pages, flags)
    } else {
        let mut s = src.inner.lock();
        let mut d = dst.inner.lock();
        map_across_inner(&mut d, Some(&mut s), src_aligned, offset, pages, flags)
    }
}

fn map_across_inner(
    dst: &mut AspaceInner,
    mut src: Option<&mut AspaceInner>,
    src_aligned: usize,
    offset: usize,
    pages: usize,
    flags: VmFlags,
) -> Result<usize, AllocError> {
    let first = dst.claim_run(pages)?;
    let virt = first * PAGE_SIZE;
    let hw = AspaceInner::hw_flags(flags);

    let mut shards = Vec::with_capacity(pages);
    for i in 0..pages {
        let src_page = src_aligned + i * PAGE_SIZE;
        let phys = match src.as_deref_mut() {
            Some(s) => s.ensure_backed(src_page),
            None => dst.ensure_backed(src_page),
        }
        .ok_or_else(|| {
            dst.set_bits(first, pages, false);
            dst.dir.unmap(virt, i * PAGE_SIZE);
            AllocError::NotFound
        })?;

        dst.dir.map_page(virt + i * PAGE_SIZE, phys, hw).map_err(|_| {
            dst.set_bits(first, pages, false);
            dst.dir.unmap(virt, i * PAGE_SIZE);
            AllocError::OutOfMemory
        })?;

        shards.push(Shard {
            page_index: i,
            phys,
        });
    }

    dst.ranges
        .insert(VirtRange {
            virt,
            pages,
            flags: flags | VmFlags::MAPPED_EXTERNAL,
            backing: Backing::Shards(shards),
        })
        .map_err(|_| AllocError::EarlyPool)?;

    Ok(virt + offset)
}
