//! Biblioteca do Kernel Brasa.
//!
//! Ponto central de exportação dos módulos do kernel.
//! O binário (`main.rs`) contém apenas o trampolim multiboot em assembly;
//! toda a lógica vive aqui.

#![cfg_attr(not(test), no_std)]
#![feature(alloc_error_handler)]
#![allow(clippy::missing_safety_doc)]

// Alocação dinâmica (Vec/Box/Arc) sobre o heap do kernel.
extern crate alloc;

// --- Módulos de Baixo Nível (Hardware) ---
pub mod arch; // CPU, GDT, IDT, portas de I/O
pub mod drivers; // Serial, PIC, PIT, ATA, vídeo

// --- Módulos Centrais ---
pub mod core; // Entry, handoff multiboot, panic, klog
pub mod interrupts; // Despacho de IRQs/exceções
pub mod klib; // Utilitários internos (bitmap, endian, align)
pub mod mm; // PMM, paging, valloc, heap
pub mod sync; // Spinlock, contadores atômicos
pub mod sys; // Tipos de sistema (Pid, Uid)

// --- Subsistemas ---
pub mod fs; // VFS, ext2, sysfs, pipes
pub mod sched; // Scheduler, tasks, loader ELF
pub mod syscall; // Interface com userspace (int 0x80)

pub use crate::core::handoff::BootInfo;
