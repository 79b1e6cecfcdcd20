//! Constantes de layout de memória.

/// Tamanho de página/frame.
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: usize = 12;

/// Teto da região identity-mapped do kernel (128 MiB). Todo frame que o
/// PMM entrega fica abaixo disso, então endereço físico == endereço
/// virtual em modo kernel. RAM acima do teto é ignorada com warning.
pub const IDENTITY_LIMIT: usize = 0x0800_0000;

/// Máximo de frames gerenciados pelo PMM.
pub const MAX_FRAMES: usize = IDENTITY_LIMIT / PAGE_SIZE;

/// Janela virtual do kernel para mapeamentos temporários (zeragem de
/// frames de outros contextos). As page tables desta faixa são
/// pré-alocadas no boot para que todos os diretórios compartilhem as
/// mesmas tabelas.
pub const KERNEL_WINDOW_BASE: usize = 0xF000_0000;
pub const KERNEL_WINDOW_END: usize = 0xF400_0000;

/// Início do espaço virtual de usuário. Binários ELF são linkados em
/// 0x08048000, logo acima do teto identity.
pub const USER_MIN: usize = IDENTITY_LIMIT;

/// Base de busca para reservas anônimas (mmap, map_across) no espaço
/// de usuário, longe da área de ELF + brk.
pub const USER_MMAP_BASE: usize = 0x4000_0000;

/// Stack de usuário: topo e tamanho inicial.
pub const USER_STACK_TOP: usize = 0xC000_0000;
pub const USER_STACK_PAGES: usize = 16; // 64 KiB

/// Tamanho da kernel stack de cada task.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;
