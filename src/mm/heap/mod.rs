//! # Heap do kernel
//!
//! Uma única região contígua, escolhida no boot como a maior área
//! livre do mapa de memória, vira uma `HeapRegion` (ver `block.rs`) e
//! é exposta ao Rust via `GlobalAlloc`.
//!
//! O lock é um spinlock com aquisição limitada: se o spin estoura (o
//! dono é o mesmo caminho re-entrando sob interrupção), a alocação
//! falha com null em vez de deadlock. Null em contexto de interrupção
//! acaba em `alloc_error_handler`, que é fatal por projeto.

mod block;

pub use block::HeapRegion;

use crate::core::handoff::{BootInfo, RegionKind};
use crate::klib::{align_down, align_up};
use crate::mm::addr::PhysAddr;
use crate::mm::config::{IDENTITY_LIMIT, PAGE_SIZE};
use crate::mm::pmm::FRAME_ALLOCATOR;
use crate::sync::Spinlock;
use core::alloc::{GlobalAlloc, Layout};
use core::sync::atomic::{AtomicBool, Ordering};

/// Limite de spins na aquisição do lock do heap.
const LOCK_SPINS: usize = 10_000;

static READY: AtomicBool = AtomicBool::new(false);

/// O heap já subiu? (valloc usa para migrar o pool de ranges)
pub fn ready() -> bool {
    READY.load(Ordering::Acquire)
}

/// Heap global protegido por spinlock limitado.
pub struct LockedHeap {
    inner: Spinlock<Option<HeapRegion>>,
}

impl LockedHeap {
    pub const fn empty() -> Self {
        Self {
            inner: Spinlock::new(None),
        }
    }
}

#[cfg_attr(not(test), global_allocator)]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let Some(mut guard) = self.inner.try_lock_bounded(LOCK_SPINS) else {
            return core::ptr::null_mut();
        };

        match guard.as_mut() {
            // Alinhamentos acima de uma palavra ganham alinhamento de
            // página (o alocador só conhece os dois).
            Some(region) => region.allocate(layout.size(), layout.align() > 8, false),
            None => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let Some(mut guard) = self.inner.try_lock_bounded(LOCK_SPINS) else {
            crate::kerror!("heap", "free perdido: lock indisponível");
            return;
        };

        if let Some(region) = guard.as_mut() {
            region.free(ptr);
        }
    }
}

#[cfg(not(test))]
#[alloc_error_handler]
fn alloc_error(layout: Layout) -> ! {
    panic!(
        "heap esgotado (ou lock indisponível em interrupção): alocação de {} bytes",
        layout.size()
    );
}

/// Alocação direta (fora do `GlobalAlloc`), com alinhamento de página
/// e zeragem opcionais.
pub fn allocate(size: usize, aligned: bool, zeroed: bool) -> *mut u8 {
    let Some(mut guard) = ALLOCATOR.inner.try_lock_bounded(LOCK_SPINS) else {
        return core::ptr::null_mut();
    };
    match guard.as_mut() {
        Some(region) => unsafe { region.allocate(size, aligned, zeroed) },
        None => core::ptr::null_mut(),
    }
}

pub fn free(ptr: *mut u8) {
    if let Some(mut guard) = ALLOCATOR.inner.try_lock_bounded(LOCK_SPINS) {
        if let Some(region) = guard.as_mut() {
            unsafe { region.free(ptr) };
        }
    }
}

/// (bytes totais, bytes livres)
pub fn stats() -> (usize, usize) {
    match ALLOCATOR.inner.lock().as_ref() {
        Some(region) => region.stats(),
        None => (0, 0),
    }
}

/// Escolhe a maior área livre do mapa de memória (descontando o
/// primeiro MiB e a imagem do kernel), reserva os frames dela no PMM e
/// entrega a região ao alocador de blocos.
pub fn init(boot: &BootInfo) {
    let (kstart, kend) = crate::mm::kernel_image_bounds();
    let kstart = align_down(kstart, PAGE_SIZE);
    let kend = align_up(kend, PAGE_SIZE);

    let mut best: Option<(usize, usize)> = None;

    for region in boot.regions() {
        if region.kind != RegionKind::Available {
            continue;
        }

        let base = region.base as usize;
        let end = core::cmp::min((region.base + region.len) as u64, IDENTITY_LIMIT as u64) as usize;

        // Candidatos: a região inteira menos o 1º MiB e menos a
        // imagem do kernel (que costuma morar no começo dela).
        let candidates = [
            (base.max(0x10_0000), kstart.min(end)),
            (kend.max(base), end),
        ];

        for (cand_start, cand_end) in candidates {
            let cand_start = align_up(cand_start, PAGE_SIZE);
            let cand_end = align_down(cand_end, PAGE_SIZE);
            if cand_end <= cand_start {
                continue;
            }
            let size = cand_end - cand_start;
            if best.map(|(_, s)| size > s).unwrap_or(true) {
                best = Some((cand_start, size));
            }
        }
    }

    let (start, size) = best.expect("heap: nenhuma área livre utilizável");

    if !FRAME_ALLOCATOR
        .lock()
        .alloc_at(PhysAddr::new(start), size / PAGE_SIZE)
    {
        panic!("heap: área escolhida já tinha frames reservados");
    }

    // Região identity: phys == virt, já mapeada pelo paging::init.
    let region = unsafe { HeapRegion::new(start, start + size) };
    *ALLOCATOR.inner.lock() = Some(region);
    READY.store(true, Ordering::Release);

    // Contabiliza no contexto do kernel (usa o pool fixo de ranges).
    crate::mm::valloc::kernel_adopt_range(
        start,
        size / PAGE_SIZE,
        crate::mm::valloc::VmFlags::WRITABLE,
    );

    crate::kinfo!(
        "heap",
        "região {:#x}..{:#x} ({} MiB)",
        start,
        start + size,
        size / (1024 * 1024)
    );
}
