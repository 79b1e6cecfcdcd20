//! # Kernel Library (KLib)
//!
//! Utilitários de baixo nível, agnósticos de arquitetura, que complementam
//! a `core` library em ambiente bare-metal.
//!
//! | Módulo           | Responsabilidade |
//! |------------------|------------------|
//! | `align`          | Alinhamento de endereços (`const fn`). |
//! | `bitmap`         | Gerenciamento de bits (PMM, valloc). |
//! | `endian`         | Leitura little-endian sobre buffers (multiboot, ELF, ext2). |
//! | `test_framework` | Self-tests de boot (feature `self_test`). |
//!
//! Nenhum módulo aqui depende de heap ou de locks; tudo é seguro para os
//! estágios iniciais de boot.

pub mod align;
pub mod bitmap;
pub mod endian;
pub mod test_framework;

pub use align::{align_down, align_up, is_aligned};
