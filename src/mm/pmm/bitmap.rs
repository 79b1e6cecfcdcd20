//! BitmapFrameAllocator - gerencia memória física usando um bitmap.
//!
//! Um bit por frame de 4 KiB; bit 1 = frame alocado. A política é
//! first-fit com scan linear a partir de um hint rotativo. O alocador
//! não guarda o tamanho das alocações: quem chama `free` devolve a
//! contagem (o valloc registra isso nos ranges).

use crate::core::handoff::{BootInfo, RegionKind};
use crate::klib::bitmap::{words_for, Bitmap};
use crate::mm::addr::PhysAddr;
use crate::mm::config::{IDENTITY_LIMIT, MAX_FRAMES, PAGE_SIZE};

pub struct BitmapFrameAllocator {
    words: [u32; words_for(MAX_FRAMES)],
    total_frames: usize,
    next_free: usize,
    used: usize,
}

impl BitmapFrameAllocator {
    pub const fn empty() -> Self {
        Self {
            words: [u32::MAX; words_for(MAX_FRAMES)],
            total_frames: 0,
            next_free: 0,
            used: 0,
        }
    }

    /// Semeia o bitmap: tudo começa reservado, regiões `Available` do
    /// loader são liberadas, e por fim o primeiro MiB, a imagem do
    /// kernel e o próprio loader voltam a ficar reservados.
    pub fn init(&mut self, boot: &BootInfo, kernel_start: usize, kernel_end: usize) {
        self.total_frames = MAX_FRAMES;
        self.used = MAX_FRAMES;

        let mut bm = Bitmap::new(&mut self.words, MAX_FRAMES);
        bm.fill(true);

        for region in boot.regions() {
            if region.kind != RegionKind::Available {
                continue;
            }

            if region.base >= IDENTITY_LIMIT as u64 {
                crate::kwarn!(
                    "pmm",
                    "região em {:#x} acima do teto identity, ignorada",
                    region.base
                );
                continue;
            }

            let end = core::cmp::min(region.base + region.len, IDENTITY_LIMIT as u64);
            let first = (region.base as usize).div_ceil(PAGE_SIZE);
            let last = end as usize / PAGE_SIZE;

            for frame in first..last {
                if bm.get(frame) {
                    bm.set(frame, false);
                    self.used -= 1;
                }
            }
        }

        // Primeiro MiB: BIOS, VGA, estruturas do loader.
        self.reserve_span(0, 0x10_0000);
        // Imagem do kernel.
        self.reserve_span(kernel_start, kernel_end);
    }

    fn reserve_span(&mut self, start: usize, end: usize) {
        let first = start / PAGE_SIZE;
        let last = end.div_ceil(PAGE_SIZE);
        let mut bm = Bitmap::new(&mut self.words, MAX_FRAMES);
        for frame in first..last.min(MAX_FRAMES) {
            if !bm.get(frame) {
                bm.set(frame, true);
                self.used += 1;
            }
        }
    }

    /// Aloca `count` frames contíguos. First-fit a partir do hint.
    pub fn alloc(&mut self, count: usize) -> Option<PhysAddr> {
        if count == 0 {
            return None;
        }

        let hint = self.next_free;
        let bm = Bitmap::new(&mut self.words, MAX_FRAMES);
        let start = match bm.find_run_from(hint, count) {
            Some(s) => s,
            None => bm.find_run_from(0, count)?,
        };

        let mut bm = Bitmap::new(&mut self.words, MAX_FRAMES);
        bm.set_range(start, count, true);
        self.used += count;
        self.next_free = start + count;

        Some(PhysAddr::new(start * PAGE_SIZE))
    }

    /// Reserva uma faixa específica, se inteiramente livre. Usado no
    /// boot para regiões conhecidas (heap, buffers fixos).
    pub fn alloc_at(&mut self, base: PhysAddr, count: usize) -> bool {
        let first = base.frame();
        if first + count > MAX_FRAMES {
            return false;
        }

        let bm = Bitmap::new(&mut self.words, MAX_FRAMES);
        for frame in first..first + count {
            if bm.get(frame) {
                return false;
            }
        }

        let mut bm = Bitmap::new(&mut self.words, MAX_FRAMES);
        bm.set_range(first, count, true);
        self.used += count;
        true
    }

    /// Libera frames alocados anteriormente. Liberar frame livre é bug
    /// do chamador e gera warning, não pânico.
    pub fn free(&mut self, base: PhysAddr, count: usize) {
        let first = base.frame();
        let mut bm = Bitmap::new(&mut self.words, MAX_FRAMES);

        for frame in first..(first + count).min(MAX_FRAMES) {
            if !bm.get(frame) {
                crate::kwarn!("pmm", "free de frame já livre: {}", frame);
                continue;
            }
            bm.set(frame, false);
            self.used -= 1;
        }

        if first < self.next_free {
            self.next_free = first;
        }
    }

    /// (total de frames, frames usados)
    pub fn stats(&self) -> (usize, usize) {
        (self.total_frames, self.used)
    }
}
