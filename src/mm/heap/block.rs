//! Alocador de blocos com header/footer e free list.
//!
//! Layout de um bloco:
//!
//! ```text
//! [ BlockHeader | conteúdo (size bytes) | footer u32 = size ]
//! ```
//!
//! O footer repete o tamanho, então o header do bloco físico anterior
//! é sempre alcançável: os blocos formam uma lista duplamente ligada
//! implícita na memória. Blocos livres guardam `{prev, next}` da free
//! list nos primeiros bytes do conteúdo, o que impõe o tamanho mínimo
//! de alocação.
//!
//! A busca percorre a free list do bloco inserido mais recentemente
//! para trás, first-fit. Todo free coalesce nas duas direções. Uma
//! `HeapRegion` opera sobre uma região arbitrária, o que permite aos
//! self-tests montar um heap de brinquedo em memória reservada.

use core::mem::size_of;

#[cfg(feature = "heap_check")]
const HEAP_MAGIC: u16 = 0xCAFE;

const STATE_USED: u16 = 1;
const STATE_FREE: u16 = 2;

#[repr(C)]
struct BlockHeader {
    size: u32,
    state: u16,
    magic: u16,
}

#[repr(C)]
struct FreeNode {
    prev: *mut FreeNode,
    next: *mut FreeNode,
}

const HDR: usize = size_of::<BlockHeader>();
const FOOTER: usize = size_of::<u32>();
/// Tamanho mínimo de conteúdo: precisa caber o nó da free list.
const MIN_CONTENT: usize = size_of::<FreeNode>();
/// Overhead total de um bloco além do conteúdo.
const OVERHEAD: usize = HDR + FOOTER;

/// Uma região contígua administrada pelo alocador de blocos.
pub struct HeapRegion {
    start: usize,
    /// Marca d'água: fim da área já carved em blocos.
    end: usize,
    /// Limite duro da região.
    max: usize,
    last_free: *mut FreeNode,
}

// SAFETY: o dono (LockedHeap) serializa o acesso.
unsafe impl Send for HeapRegion {}

impl HeapRegion {
    /// # Safety
    /// `[start, max)` deve ser memória mapeada, gravável e exclusiva
    /// desta região.
    pub unsafe fn new(start: usize, max: usize) -> Self {
        Self {
            start,
            end: start,
            max,
            last_free: core::ptr::null_mut(),
        }
    }

    // ---- helpers de navegação -------------------------------------

    unsafe fn content(h: *mut BlockHeader) -> *mut u8 {
        (h as usize + HDR) as *mut u8
    }

    unsafe fn header_from_content(ptr: *mut u8) -> *mut BlockHeader {
        (ptr as usize - HDR) as *mut BlockHeader
    }

    unsafe fn footer(h: *mut BlockHeader) -> *mut u32 {
        (h as usize + HDR + (*h).size as usize) as *mut u32
    }

    unsafe fn next_block(h: *mut BlockHeader) -> *mut BlockHeader {
        (Self::footer(h) as usize + FOOTER) as *mut BlockHeader
    }

    unsafe fn prev_block(h: *mut BlockHeader) -> *mut BlockHeader {
        let prev_footer = (h as usize - FOOTER) as *const u32;
        (h as usize - FOOTER - *prev_footer as usize - HDR) as *mut BlockHeader
    }

    unsafe fn free_node(h: *mut BlockHeader) -> *mut FreeNode {
        Self::content(h) as *mut FreeNode
    }

    unsafe fn header_from_node(n: *mut FreeNode) -> *mut BlockHeader {
        (n as usize - HDR) as *mut BlockHeader
    }

    fn full_size(content: usize) -> usize {
        content + OVERHEAD
    }

    // ---- metadados -------------------------------------------------

    /// Escreve tamanho (header + footer) de um bloco.
    unsafe fn set_block(&mut self, h: *mut BlockHeader, size: usize) -> *mut BlockHeader {
        (*h).size = size as u32;
        #[cfg(feature = "heap_check")]
        {
            (*h).magic = HEAP_MAGIC;
        }
        *Self::footer(h) = size as u32;
        h
    }

    #[cfg(feature = "heap_check")]
    unsafe fn check_header(&self, h: *mut BlockHeader) {
        if (*h).magic != HEAP_MAGIC {
            panic!("heap: magic inválido em {:#x}", h as usize);
        }
        if ((*h).size as usize) < MIN_CONTENT {
            panic!("heap: bloco menor que o mínimo em {:#x}", h as usize);
        }
        if *Self::footer(h) != (*h).size {
            panic!("heap: footer não confere em {:#x}", h as usize);
        }
    }

    #[cfg(not(feature = "heap_check"))]
    unsafe fn check_header(&self, _h: *mut BlockHeader) {}

    unsafe fn unlink_free(&mut self, node: *mut FreeNode) {
        if !(*node).next.is_null() {
            (*(*node).next).prev = (*node).prev;
        }
        if !(*node).prev.is_null() {
            (*(*node).prev).next = (*node).next;
        }
        if node == self.last_free {
            self.last_free = (*node).prev;
        }
    }

    /// Marca um bloco como livre, coalescendo com os vizinhos físicos.
    /// Retorna o header resultante.
    unsafe fn free_block(&mut self, mut h: *mut BlockHeader, check_next: bool) -> *mut BlockHeader {
        // Vizinho anterior livre: cresce o vizinho para nos engolir.
        if (h as usize) > self.start {
            let prev = Self::prev_block(h);
            if (*prev).state == STATE_FREE {
                let merged = (*prev).size as usize + Self::full_size((*h).size as usize);
                h = self.set_block(prev, merged);
            } else {
                self.push_free(h);
            }
        } else {
            self.push_free(h);
        }

        // Vizinho seguinte livre: engole o vizinho e desencadeia o nó
        // dele.
        let next = Self::next_block(h);
        if check_next && (next as usize) < self.end && (*next).state == STATE_FREE {
            let merged = (*h).size as usize + Self::full_size((*next).size as usize);
            self.unlink_free(Self::free_node(next));
            self.set_block(h, merged);
        }

        h
    }

    unsafe fn push_free(&mut self, h: *mut BlockHeader) {
        (*h).state = STATE_FREE;
        let node = Self::free_node(h);
        (*node).prev = self.last_free;
        (*node).next = core::ptr::null_mut();
        if !self.last_free.is_null() {
            (*self.last_free).next = node;
        }
        self.last_free = node;
    }

    /// Divide um bloco em `[size]` + resto livre, se o resto comporta
    /// header + footer + nó da free list. Retorna o resto.
    unsafe fn split_block(&mut self, h: *mut BlockHeader, size: usize) -> Option<*mut BlockHeader> {
        if ((*h).size as usize) < size + OVERHEAD + MIN_CONTENT {
            return None;
        }

        let orig = (*h).size as usize;
        self.set_block(h, size);
        let rest = orig - size - OVERHEAD;
        Some(self.set_block(Self::next_block(h), rest))
    }

    /// Offset necessário para alinhar o conteúdo de um bloco em `h` a
    /// uma página. Se o offset não comporta um bloco-resto na frente,
    /// empurra uma página inteira.
    unsafe fn alignment_offset(&self, h: usize) -> usize {
        let content = h + HDR;
        let page = crate::mm::config::PAGE_SIZE;

        if content & (page - 1) == 0 {
            return 0;
        }

        let mut offset = crate::klib::align_up(content, page) - content;
        if offset < OVERHEAD + MIN_CONTENT {
            offset += page;
        }
        offset
    }

    /// First-fit na free list, do mais recente para trás.
    unsafe fn find_free_block(&mut self, size: usize, align: bool) -> Option<*mut BlockHeader> {
        let mut node = self.last_free;
        while !node.is_null() {
            let h = Self::header_from_node(node);
            self.check_header(h);

            if (*h).state != STATE_FREE {
                crate::kerror!("heap", "bloco não-livre na free list em {:#x}", h as usize);
                node = (*node).prev;
                continue;
            }

            let mut needed = size;
            let mut align_off = 0usize;
            if align {
                align_off = self.alignment_offset(h as usize);
                needed += align_off + OVERHEAD;
            }

            if (*h).size as usize >= needed {
                self.unlink_free(node);

                // Recorta do bloco só o que a alocação precisa.
                let rest = self.split_block(h, size + align_off);
                if let Some(rest) = rest {
                    (*h).state = STATE_USED;
                    self.free_block(rest, true);
                }

                return Some(h);
            }

            node = (*node).prev;
        }
        None
    }

    // ---- API -------------------------------------------------------

    /// Aloca `size` bytes. `align` alinha o ponteiro retornado a uma
    /// página; `zero` zera o conteúdo. Retorna null em exaustão da
    /// região.
    pub unsafe fn allocate(&mut self, size: usize, align: bool, zero: bool) -> *mut u8 {
        let size = size.max(MIN_CONTENT);
        // Mantém blocos alinhados a 4 bytes (footer/header).
        let size = crate::klib::align_up(size, 4);

        let mut header = self.find_free_block(size, align);
        let mut align_off = 0usize;

        if align {
            let base = header.map(|h| h as usize).unwrap_or(self.end);
            align_off = self.alignment_offset(base);
        }

        // Nada na free list serve: cresce a marca d'água.
        if header.is_none() {
            let needed = Self::full_size(size + align_off);
            if self.end + needed > self.max {
                return core::ptr::null_mut();
            }

            let h = self.set_block(self.end as *mut BlockHeader, size + align_off);
            self.end = Self::footer(h) as usize + FOOTER;
            header = Some(h);
        }

        let mut h = header.unwrap();

        // Recorta o resto da frente para alinhar o conteúdo.
        if align && align_off != 0 {
            let front = h;
            match self.split_block(front, align_off - OVERHEAD) {
                Some(aligned) => {
                    (*aligned).state = STATE_USED;
                    self.free_block(front, true);
                    h = aligned;
                }
                None => {
                    // split não pôde acontecer: o offset embute o
                    // overhead, então só avança o conteúdo... não há
                    // como; devolve o bloco e falha.
                    self.free_block(front, true);
                    return core::ptr::null_mut();
                }
            }
        }

        (*h).state = STATE_USED;
        self.check_header(h);

        let content = Self::content(h);
        if zero {
            core::ptr::write_bytes(content, 0, size);
        }
        content
    }

    /// Libera uma alocação feita por `allocate`.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let h = Self::header_from_content(ptr);
        if (h as usize) < self.start || (ptr as usize) >= self.end || (*h).state == STATE_FREE {
            crate::kerror!("heap", "free de bloco inválido em {:#x}", ptr as usize);
            return;
        }

        self.check_header(h);
        self.free_block(h, true);
    }

    /// (total da região, bytes livres). Livre = área ainda não carved
    /// mais a soma dos blocos da free list.
    pub fn stats(&self) -> (usize, usize) {
        let mut free = self.max - self.end;
        unsafe {
            let mut node = self.last_free;
            while !node.is_null() {
                let h = Self::header_from_node(node);
                free += (*h).size as usize;
                node = (*node).prev;
            }
        }
        (self.max - self.start, free)
    }

    /// A free list representa uma única região contígua cobrindo tudo
    /// que já foi carved? (usado pelos self-tests de round-trip)
    pub fn is_fully_coalesced(&self) -> bool {
        unsafe {
            if self.last_free.is_null() {
                return self.end == self.start;
            }
            let h = Self::header_from_node(self.last_free);
            let only_one = (*self.last_free).prev.is_null();
            let covers = h as usize == self.start
                && Self::footer(h) as usize + FOOTER == self.end;
            only_one && covers
        }
    }
}
