//! Decodificação das estruturas on-disk do ext2 (revisões 0 e 1).
//!
//! Tudo little-endian, lido campo a campo com `klib::endian`.

use crate::fs::vfs::FileType;
use crate::klib::endian::{read_u16_le, read_u32_le};
use alloc::string::String;
use alloc::vec::Vec;

/// O superblock mora sempre no byte 1024 do volume.
pub const SUPERBLOCK_OFFSET: u64 = 1024;
pub const SUPERBLOCK_SIZE: usize = 1024;
pub const SUPERBLOCK_MAGIC: u16 = 0xEF53;

pub const STATE_CLEAN: u16 = 1;

/// O diretório raiz é sempre o inode 2.
pub const ROOT_INODE: u32 = 2;

// Bits de tipo no campo mode do inode.
pub const IFSOCK: u16 = 0xC000;
pub const IFLNK: u16 = 0xA000;
pub const IFREG: u16 = 0x8000;
pub const IFBLK: u16 = 0x6000;
pub const IFDIR: u16 = 0x4000;
pub const IFCHR: u16 = 0x2000;
pub const IFIFO: u16 = 0x1000;
pub const TYPE_MASK: u16 = 0xF000;

/// Symlinks até este tamanho guardam o alvo na área de ponteiros de
/// bloco do inode.
pub const FAST_SYMLINK_MAX: u32 = 60;

/// Features incompat que o driver entende (nenhuma: ext2 baseline).
pub const INCOMPAT_SUPPORTED: u32 = 0;

/// Snapshot do superblock.
#[derive(Debug, Clone)]
pub struct Superblock {
    pub inode_count: u32,
    pub block_count: u32,
    pub free_blocks: u32,
    pub free_inodes: u32,
    pub first_data_block: u32,
    log_block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub mount_count: u16,
    pub magic: u16,
    pub state: u16,
    pub revision: u32,
    inode_size_raw: u16,
    pub features_compat: u32,
    pub features_incompat: u32,
    pub features_ro: u32,
}

impl Superblock {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < 104 {
            return None;
        }
        Some(Self {
            inode_count: read_u32_le(buf, 0),
            block_count: read_u32_le(buf, 4),
            free_blocks: read_u32_le(buf, 12),
            free_inodes: read_u32_le(buf, 16),
            first_data_block: read_u32_le(buf, 20),
            log_block_size: read_u32_le(buf, 24),
            blocks_per_group: read_u32_le(buf, 32),
            inodes_per_group: read_u32_le(buf, 40),
            mount_count: read_u16_le(buf, 52),
            magic: read_u16_le(buf, 56),
            state: read_u16_le(buf, 58),
            revision: read_u32_le(buf, 76),
            inode_size_raw: read_u16_le(buf, 88),
            features_compat: read_u32_le(buf, 92),
            features_incompat: read_u32_le(buf, 96),
            features_ro: read_u32_le(buf, 100),
        })
    }

    pub fn block_size(&self) -> usize {
        1024usize << self.log_block_size
    }

    /// Revisão 0 fixa o inode em 128 bytes; revisão 1 traz o campo.
    pub fn inode_size(&self) -> usize {
        if self.revision == 0 {
            128
        } else {
            self.inode_size_raw as usize
        }
    }

    /// Offset em bytes do bloco `n`.
    pub fn block_offset(&self, block: u32) -> u64 {
        block as u64 * self.block_size() as u64
    }

    /// Número de blockgroups do volume.
    pub fn group_count(&self) -> usize {
        (self.block_count as usize).div_ceil(self.blocks_per_group as usize)
    }

    /// Incrementa o mount count direto no buffer cru (para write-back).
    pub fn bump_mount_count(raw: &mut [u8]) {
        let count = read_u16_le(raw, 52).wrapping_add(1);
        crate::klib::endian::write_u16_le(raw, 52, count);
    }
}

/// Descritor de blockgroup (32 bytes on-disk).
#[derive(Debug, Clone, Copy)]
pub struct BlockGroup {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks: u16,
    pub free_inodes: u16,
}

pub const BLOCKGROUP_SIZE: usize = 32;

impl BlockGroup {
    pub fn parse(buf: &[u8], index: usize) -> Option<Self> {
        let base = index * BLOCKGROUP_SIZE;
        if base + 18 > buf.len() {
            return None;
        }
        Some(Self {
            block_bitmap: read_u32_le(buf, base),
            inode_bitmap: read_u32_le(buf, base + 4),
            inode_table: read_u32_le(buf, base + 8),
            free_blocks: read_u16_le(buf, base + 12),
            free_inodes: read_u16_le(buf, base + 14),
        })
    }
}

/// Um inode decodificado.
#[derive(Debug, Clone)]
pub struct Inode {
    pub mode: u16,
    pub uid: u16,
    pub size: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub gid: u16,
    pub link_count: u16,
    pub sector_count: u32,
    pub blocks: [u32; 15],
}

/// Offset do campo mode dentro do inode on-disk.
pub const INODE_MODE_OFFSET: usize = 0;

impl Inode {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < 100 {
            return None;
        }
        let mut blocks = [0u32; 15];
        for (i, b) in blocks.iter_mut().enumerate() {
            *b = read_u32_le(buf, 40 + i * 4);
        }
        Some(Self {
            mode: read_u16_le(buf, 0),
            uid: read_u16_le(buf, 2),
            size: read_u32_le(buf, 4),
            atime: read_u32_le(buf, 8),
            ctime: read_u32_le(buf, 12),
            mtime: read_u32_le(buf, 16),
            gid: read_u16_le(buf, 24),
            link_count: read_u16_le(buf, 26),
            sector_count: read_u32_le(buf, 28),
            blocks,
        })
    }

    pub fn file_type(&self) -> FileType {
        match self.mode & TYPE_MASK {
            IFREG => FileType::Regular,
            IFDIR => FileType::Directory,
            IFLNK => FileType::Symlink,
            IFCHR => FileType::CharDevice,
            IFBLK => FileType::BlockDevice,
            IFIFO => FileType::Fifo,
            IFSOCK => FileType::Socket,
            _ => FileType::Regular,
        }
    }

    /// Alvo de um fast symlink (armazenado na área de ponteiros).
    pub fn inline_symlink_target(&self) -> Option<String> {
        if self.size > FAST_SYMLINK_MAX {
            return None;
        }
        let mut bytes = Vec::with_capacity(self.size as usize);
        for b in &self.blocks {
            bytes.extend_from_slice(&b.to_le_bytes());
        }
        bytes.truncate(self.size as usize);
        String::from_utf8(bytes).ok()
    }
}

/// Uma entrada de diretório on-disk.
#[derive(Debug, Clone)]
pub struct RawDirent {
    pub inode: u32,
    pub rec_len: u16,
    pub file_type: u8,
    pub name: String,
    /// Offset do registro dentro do bloco (para unlink).
    pub offset: usize,
}

/// Itera os dirents de um bloco de diretório.
pub fn parse_dirents(block: &[u8]) -> Vec<RawDirent> {
    let mut out = Vec::new();
    let mut off = 0usize;

    while off + 8 <= block.len() {
        let inode = read_u32_le(block, off);
        let rec_len = read_u16_le(block, off + 4) as usize;
        let name_len = block[off + 6] as usize;
        let file_type = block[off + 7];

        // rec_len zero ou curto demais: bloco corrompido, para aqui.
        if rec_len < 8 || off + rec_len > block.len() {
            break;
        }

        if inode != 0 && name_len > 0 && off + 8 + name_len <= block.len() {
            if let Ok(name) = core::str::from_utf8(&block[off + 8..off + 8 + name_len]) {
                out.push(RawDirent {
                    inode,
                    rec_len: rec_len as u16,
                    file_type,
                    name: String::from(name),
                    offset: off,
                });
            }
        }

        off += rec_len;
    }
    out
}

/// Tipo de dirent → FileType (quando o volume usa o feature filetype;
/// caso contrário o chamador consulta o inode).
pub fn dirent_file_type(t: u8) -> Option<FileType> {
    match t {
        1 => Some(FileType::Regular),
        2 => Some(FileType::Directory),
        3 => Some(FileType::CharDevice),
        4 => Some(FileType::BlockDevice),
        5 => Some(FileType::Fifo),
        6 => Some(FileType::Socket),
        7 => Some(FileType::Symlink),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::klib::endian::{write_u16_le, write_u32_le};

    fn superblock_raw() -> [u8; 1024] {
        let mut sb = [0u8; 1024];
        write_u32_le(&mut sb, 0, 64); // inode_count
        write_u32_le(&mut sb, 4, 256); // block_count
        write_u32_le(&mut sb, 20, 1); // first_data_block
        write_u32_le(&mut sb, 24, 0); // log_block_size -> 1024
        write_u32_le(&mut sb, 32, 256); // blocks_per_group
        write_u32_le(&mut sb, 40, 64); // inodes_per_group
        write_u16_le(&mut sb, 52, 3); // mount_count
        write_u16_le(&mut sb, 56, SUPERBLOCK_MAGIC);
        write_u16_le(&mut sb, 58, STATE_CLEAN);
        write_u32_le(&mut sb, 76, 1); // revisão
        write_u16_le(&mut sb, 88, 128); // inode_size
        sb
    }

    #[test]
    fn superblock_parse() {
        let raw = superblock_raw();
        let sb = Superblock::parse(&raw).unwrap();
        assert_eq!(sb.magic, SUPERBLOCK_MAGIC);
        assert_eq!(sb.block_size(), 1024);
        assert_eq!(sb.inode_size(), 128);
        assert_eq!(sb.group_count(), 1);
        assert_eq!(sb.block_offset(2), 2048);
    }

    #[test]
    fn bump_mount_count_no_buffer() {
        let mut raw = superblock_raw();
        Superblock::bump_mount_count(&mut raw);
        let sb = Superblock::parse(&raw).unwrap();
        assert_eq!(sb.mount_count, 4);
    }

    #[test]
    fn inode_parse_e_tipo() {
        let mut raw = [0u8; 128];
        write_u16_le(&mut raw, 0, IFREG | 0o644);
        write_u32_le(&mut raw, 4, 4096);
        write_u16_le(&mut raw, 26, 1);
        write_u32_le(&mut raw, 40, 21); // bloco direto 0

        let inode = Inode::parse(&raw).unwrap();
        assert_eq!(inode.file_type(), FileType::Regular);
        assert_eq!(inode.size, 4096);
        assert_eq!(inode.blocks[0], 21);
    }

    #[test]
    fn fast_symlink_inline() {
        let mut raw = [0u8; 128];
        write_u16_le(&mut raw, 0, IFLNK | 0o777);
        write_u32_le(&mut raw, 4, 9); // strlen("/etc/host") = 9
        raw[40..49].copy_from_slice(b"/etc/host");

        let inode = Inode::parse(&raw).unwrap();
        assert_eq!(inode.inline_symlink_target().unwrap(), "/etc/host");
    }

    #[test]
    fn dirent_walk() {
        let mut block = [0u8; 64];
        // "." inode 2
        write_u32_le(&mut block, 0, 2);
        write_u16_le(&mut block, 4, 12);
        block[6] = 1;
        block[7] = 2;
        block[8] = b'.';
        // "hostname" inode 12, resto do bloco
        write_u32_le(&mut block, 12, 12);
        write_u16_le(&mut block, 16, 52);
        block[18] = 8;
        block[19] = 1;
        block[20..28].copy_from_slice(b"hostname");

        let entries = parse_dirents(&block);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, ".");
        assert_eq!(entries[1].name, "hostname");
        assert_eq!(entries[1].inode, 12);
        assert_eq!(entries[1].offset, 12);
        assert_eq!(dirent_file_type(entries[1].file_type), Some(FileType::Regular));
    }
}
