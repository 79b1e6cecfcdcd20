//! Physical Memory Manager: alocador de frames por bitmap.

mod bitmap;

pub use bitmap::BitmapFrameAllocator;

use crate::core::handoff::BootInfo;
use crate::sync::Spinlock;

/// Instância global. Fora do boot, os chamadores normais passam pelo
/// valloc do contexto (que segura o próprio lock); o spinlock daqui
/// cobre o uso direto durante bring-up e os self-tests.
pub static FRAME_ALLOCATOR: Spinlock<BitmapFrameAllocator> =
    Spinlock::new(BitmapFrameAllocator::empty());

/// Semeia o bitmap a partir do mapa de memória do loader.
pub fn init(boot: &BootInfo) {
    let (kstart, kend) = crate::mm::kernel_image_bounds();
    let mut pmm = FRAME_ALLOCATOR.lock();
    pmm.init(boot, kstart, kend);

    let (total, used) = pmm.stats();
    crate::kinfo!(
        "pmm",
        "{} frames ({} MiB), {} reservados no boot",
        total,
        total * crate::mm::config::PAGE_SIZE / (1024 * 1024),
        used
    );
}
