//! Driver ext2 (leitura completa, escrita limitada).
//!
//! No mount: superblock no byte 1024, magic 0xEF53, estado clean
//! obrigatório; features incompat desconhecidas derrubam o mount para
//! read-only (com warning); features read-only desconhecidas só geram
//! warning. A tabela de blockgroups e o inode raiz ficam cacheados e o
//! mount count é reescrito no disco.
//!
//! Resolução de bloco: 0-11 diretos, 12 indireto, 13 duplo, 14 triplo.

pub mod disk;

use self::disk::{
    BlockGroup, Inode, RawDirent, Superblock, FAST_SYMLINK_MAX, INCOMPAT_SUPPORTED, ROOT_INODE,
    STATE_CLEAN, SUPERBLOCK_MAGIC, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE,
};
use super::block::BlockDevice;
use super::vfs::{self, DirEntry, FileType, NodeInfo, OpenFlags, VfsOps};
use crate::klib::endian::{read_u32_le, write_u16_le, write_u32_le};
use crate::syscall::error::{Errno, SysResult};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

pub struct Ext2Fs {
    dev: &'static dyn BlockDevice,
    device_name: &'static str,
    sb: Superblock,
    groups: Vec<BlockGroup>,
    read_only: bool,
}

impl Ext2Fs {
    /// Lê e valida o volume. Falha se o magic ou o estado clean não
    /// baterem.
    pub fn mount(dev: &'static dyn BlockDevice, device_name: &'static str) -> SysResult<Self> {
        let mut sb_raw = vec![0u8; SUPERBLOCK_SIZE];
        dev.read_at(SUPERBLOCK_OFFSET, &mut sb_raw)
            .map_err(|_| Errno::EIO)?;

        let sb = Superblock::parse(&sb_raw).ok_or(Errno::EINVAL)?;
        if sb.magic != SUPERBLOCK_MAGIC {
            crate::kerror!("ext2", "magic inválido: {:#x}", sb.magic);
            return Err(Errno::EINVAL);
        }
        if sb.state != STATE_CLEAN {
            crate::kerror!("ext2", "volume não está clean; rode fsck.ext2");
            return Err(Errno::EINVAL);
        }

        crate::kinfo!(
            "ext2",
            "revisão {}, {} livres / {} blocos, bloco de {} bytes",
            sb.revision,
            sb.free_blocks,
            sb.block_count,
            sb.block_size()
        );

        let mut read_only = false;
        if sb.features_incompat & !INCOMPAT_SUPPORTED != 0 {
            crate::kwarn!(
                "ext2",
                "features incompat desconhecidas ({:#x}); montando read-only",
                sb.features_incompat
            );
            read_only = true;
        }
        if sb.features_ro != 0 {
            crate::kwarn!(
                "ext2",
                "features read-only desconhecidas ({:#x}); seguindo mesmo assim",
                sb.features_ro
            );
        }
        if sb.features_compat != 0 {
            crate::kinfo!(
                "ext2",
                "features compat ignoradas ({:#x})",
                sb.features_compat
            );
        }

        // Tabela de blockgroups: começa no bloco seguinte ao
        // superblock (bloco 2 para blocos de 1 KiB).
        let group_count = sb.group_count();
        let table_offset = sb.block_offset(sb.first_data_block + 1);
        let mut table_raw = vec![0u8; group_count * disk::BLOCKGROUP_SIZE];
        dev.read_at(table_offset, &mut table_raw)
            .map_err(|_| Errno::EIO)?;

        let mut groups = Vec::with_capacity(group_count);
        for i in 0..group_count {
            groups.push(BlockGroup::parse(&table_raw, i).ok_or(Errno::EINVAL)?);
        }

        let fs = Self {
            dev,
            device_name,
            sb,
            groups,
            read_only,
        };

        // Valida o inode raiz antes de aceitar o volume.
        let root = fs.read_inode(ROOT_INODE)?;
        if root.file_type() != FileType::Directory {
            crate::kerror!("ext2", "inode raiz não é diretório");
            return Err(Errno::EINVAL);
        }

        // Incrementa o mount count no disco (best-effort).
        if !fs.read_only {
            Superblock::bump_mount_count(&mut sb_raw);
            if fs.dev.write_at(SUPERBLOCK_OFFSET, &sb_raw).is_err() {
                crate::kwarn!("ext2", "não consegui reescrever o superblock");
            }
        }

        Ok(fs)
    }

    fn bs(&self) -> usize {
        self.sb.block_size()
    }

    /// Offset on-disk do inode `num`.
    fn inode_disk_offset(&self, num: u32) -> SysResult<u64> {
        if num == 0 || num > self.sb.inode_count {
            return Err(Errno::ENOENT);
        }
        let group = ((num - 1) / self.sb.inodes_per_group) as usize;
        let index = ((num - 1) % self.sb.inodes_per_group) as u64;
        let bg = self.groups.get(group).ok_or(Errno::ENOENT)?;

        Ok(self.sb.block_offset(bg.inode_table) + index * self.sb.inode_size() as u64)
    }

    fn read_inode(&self, num: u32) -> SysResult<Inode> {
        let offset = self.inode_disk_offset(num)?;
        let mut raw = vec![0u8; self.sb.inode_size()];
        self.dev.read_at(offset, &mut raw).map_err(|_| Errno::EIO)?;
        Inode::parse(&raw).ok_or(Errno::EIO)
    }

    /// Lê uma entrada de uma tabela de ponteiros de bloco.
    fn table_entry(&self, table_block: u32, index: usize) -> SysResult<u32> {
        if table_block == 0 {
            return Ok(0);
        }
        let mut raw = [0u8; 4];
        let offset = self.sb.block_offset(table_block) + (index * 4) as u64;
        self.dev.read_at(offset, &mut raw).map_err(|_| Errno::EIO)?;
        Ok(read_u32_le(&raw, 0))
    }

    /// Traduz bloco-do-arquivo → bloco-do-volume, cobrindo os níveis
    /// direto, indireto, duplo e triplo. Retorna 0 para buracos.
    fn block_for(&self, inode: &Inode, file_block: usize) -> SysResult<u32> {
        let ppb = self.bs() / 4;

        if file_block < 12 {
            return Ok(inode.blocks[file_block]);
        }
        let mut fb = file_block - 12;

        if fb < ppb {
            return self.table_entry(inode.blocks[12], fb);
        }
        fb -= ppb;

        if fb < ppb * ppb {
            let l2 = self.table_entry(inode.blocks[13], fb / ppb)?;
            return self.table_entry(l2, fb % ppb);
        }
        fb -= ppb * ppb;

        if fb < ppb * ppb * ppb {
            let l2 = self.table_entry(inode.blocks[14], fb / (ppb * ppb))?;
            let l3 = self.table_entry(l2, (fb / ppb) % ppb)?;
            return self.table_entry(l3, fb % ppb);
        }

        Err(Errno::EFBIG)
    }

    /// Lê a janela `[offset, offset+buf.len)` de um arquivo, bloco a
    /// bloco inteiro, copiando só o trecho pedido.
    fn read_window(&self, inode: &Inode, offset: u64, buf: &mut [u8]) -> SysResult<usize> {
        let size = inode.size as u64;
        if offset >= size {
            return Ok(0);
        }
        let len = core::cmp::min(buf.len() as u64, size - offset) as usize;
        let bs = self.bs();
        let mut block_buf = vec![0u8; bs];

        let mut copied = 0usize;
        while copied < len {
            let pos = offset as usize + copied;
            let fb = pos / bs;
            let in_block = pos % bs;
            let chunk = core::cmp::min(bs - in_block, len - copied);

            let block = self.block_for(inode, fb)?;
            if block == 0 {
                // Buraco: zeros.
                buf[copied..copied + chunk].fill(0);
            } else {
                self.dev
                    .read_at(self.sb.block_offset(block), &mut block_buf)
                    .map_err(|_| Errno::EIO)?;
                buf[copied..copied + chunk].copy_from_slice(&block_buf[in_block..in_block + chunk]);
            }
            copied += chunk;
        }
        Ok(copied)
    }

    /// Todos os dirents de um diretório.
    fn read_dir(&self, inode: &Inode) -> SysResult<Vec<RawDirent>> {
        if inode.file_type() != FileType::Directory {
            return Err(Errno::ENOTDIR);
        }

        let bs = self.bs();
        let blocks = (inode.size as usize).div_ceil(bs);
        let mut block_buf = vec![0u8; bs];
        let mut out = Vec::new();

        for fb in 0..blocks {
            let block = self.block_for(inode, fb)?;
            if block == 0 {
                continue;
            }
            self.dev
                .read_at(self.sb.block_offset(block), &mut block_buf)
                .map_err(|_| Errno::EIO)?;
            out.extend(disk::parse_dirents(&block_buf));
        }
        Ok(out)
    }

    /// Caminha `tail` (relativo à raiz do mount) até um inode.
    /// Retorna (inode, inode do diretório pai).
    fn resolve(&self, tail: &str) -> SysResult<(u32, u32)> {
        let mut current = ROOT_INODE;
        let mut parent = ROOT_INODE;

        for component in tail.split('/').filter(|c| !c.is_empty()) {
            let dir = self.read_inode(current)?;
            let entries = self.read_dir(&dir)?;

            // Scan linear, exatamente como o formato pede.
            let hit = entries.iter().find(|e| e.name == component);
            match hit {
                Some(entry) => {
                    parent = current;
                    current = entry.inode;
                }
                None => return Err(Errno::ENOENT),
            }
        }
        Ok((current, parent))
    }

    fn node_info(&self, num: u32, inode: &Inode) -> NodeInfo {
        NodeInfo {
            id: num,
            size: inode.size as u64,
            file_type: inode.file_type(),
            mode: inode.mode & 0x0FFF,
            nlink: inode.link_count,
            uid: inode.uid,
            gid: inode.gid,
        }
    }

    /// Alvo de um symlink: inline para tamanhos até 60, corpo do
    /// arquivo acima disso.
    fn symlink_target(&self, inode: &Inode) -> SysResult<String> {
        if inode.file_type() != FileType::Symlink {
            return Err(Errno::EINVAL);
        }

        if inode.size <= FAST_SYMLINK_MAX {
            return inode.inline_symlink_target().ok_or(Errno::EIO);
        }

        let mut buf = vec![0u8; inode.size as usize];
        let n = self.read_window(inode, 0, &mut buf)?;
        buf.truncate(n);
        String::from_utf8(buf).map_err(|_| Errno::EIO)
    }
}

impl VfsOps for Ext2Fs {
    fn open(&self, tail: &str, flags: OpenFlags) -> SysResult<NodeInfo> {
        if (flags.contains(OpenFlags::WRONLY) || flags.contains(OpenFlags::RDWR)) && self.read_only
        {
            return Err(Errno::EPERM);
        }
        let (num, _) = self.resolve(tail)?;
        let inode = self.read_inode(num)?;
        Ok(self.node_info(num, &inode))
    }

    fn stat(&self, tail: &str) -> SysResult<NodeInfo> {
        let (num, _) = self.resolve(tail)?;
        let inode = self.read_inode(num)?;
        Ok(self.node_info(num, &inode))
    }

    fn read(
        &self,
        node: &NodeInfo,
        offset: u64,
        buf: &mut [u8],
        _flags: OpenFlags,
    ) -> SysResult<usize> {
        let inode = self.read_inode(node.id)?;
        match inode.file_type() {
            FileType::Regular => self.read_window(&inode, offset, buf),
            FileType::Symlink => {
                // Leitura direta de symlink devolve o alvo (o VFS já
                // expandiu caminhos; isto atende readlink via read).
                let target = self.symlink_target(&inode)?;
                let bytes = target.as_bytes();
                let start = core::cmp::min(offset as usize, bytes.len());
                let n = core::cmp::min(buf.len(), bytes.len() - start);
                buf[..n].copy_from_slice(&bytes[start..start + n]);
                Ok(n)
            }
            FileType::Directory => Err(Errno::EISDIR),
            _ => Err(Errno::EINVAL),
        }
    }

    /// Escrita best-effort: só sobre blocos já alocados, sem crescer o
    /// arquivo (alocação de blocos é um gap documentado).
    fn write(&self, node: &NodeInfo, offset: u64, buf: &[u8]) -> SysResult<usize> {
        if self.read_only {
            return Err(Errno::EPERM);
        }

        let inode = self.read_inode(node.id)?;
        if inode.file_type() != FileType::Regular {
            return Err(Errno::EINVAL);
        }

        let size = inode.size as u64;
        if offset >= size {
            return Err(Errno::EFBIG);
        }
        let len = core::cmp::min(buf.len() as u64, size - offset) as usize;

        let bs = self.bs();
        let mut written = 0usize;
        while written < len {
            let pos = offset as usize + written;
            let fb = pos / bs;
            let in_block = pos % bs;
            let chunk = core::cmp::min(bs - in_block, len - written);

            let block = self.block_for(&inode, fb)?;
            if block == 0 {
                // Buraco: não alocamos blocos novos.
                break;
            }
            self.dev
                .write_at(
                    self.sb.block_offset(block) + in_block as u64,
                    &buf[written..written + chunk],
                )
                .map_err(|_| Errno::EIO)?;
            written += chunk;
        }

        if written == 0 {
            return Err(Errno::EFBIG);
        }
        Ok(written)
    }

    fn getdents(&self, node: &NodeInfo) -> SysResult<Vec<DirEntry>> {
        let inode = self.read_inode(node.id)?;
        let raw = self.read_dir(&inode)?;

        let mut out = Vec::with_capacity(raw.len());
        for entry in raw {
            let file_type = match disk::dirent_file_type(entry.file_type) {
                Some(ft) => ft,
                // Volume sem o feature filetype: consulta o inode.
                None => self
                    .read_inode(entry.inode)
                    .map(|i| i.file_type())
                    .unwrap_or(FileType::Regular),
            };
            out.push(DirEntry {
                inode: entry.inode,
                file_type,
                name: entry.name,
            });
        }
        Ok(out)
    }

    /// chmod reescreve o campo mode preservando os bits de tipo.
    fn chmod(&self, tail: &str, mode: u16) -> SysResult<()> {
        if self.read_only {
            return Err(Errno::EPERM);
        }

        let (num, _) = self.resolve(tail)?;
        let offset = self.inode_disk_offset(num)?;

        let mut raw = vec![0u8; self.sb.inode_size()];
        self.dev.read_at(offset, &mut raw).map_err(|_| Errno::EIO)?;

        let old = crate::klib::endian::read_u16_le(&raw, disk::INODE_MODE_OFFSET);
        let new = (old & disk::TYPE_MASK) | (mode & 0x0FFF);
        write_u16_le(&mut raw, disk::INODE_MODE_OFFSET, new);

        self.dev.write_at(offset, &raw).map_err(|_| Errno::EIO)
    }

    /// unlink remove o dirent do diretório pai. Decremento de link
    /// count e devolução de blocos continuam como gaps documentados.
    fn unlink(&self, tail: &str) -> SysResult<()> {
        if self.read_only {
            return Err(Errno::EPERM);
        }

        let (num, parent) = self.resolve(tail)?;
        if num == ROOT_INODE {
            return Err(Errno::EPERM);
        }

        let name = tail.rsplit('/').next().unwrap_or(tail);
        let dir = self.read_inode(parent)?;

        let bs = self.bs();
        let blocks = (dir.size as usize).div_ceil(bs);
        let mut block_buf = vec![0u8; bs];

        for fb in 0..blocks {
            let block = self.block_for(&dir, fb)?;
            if block == 0 {
                continue;
            }
            self.dev
                .read_at(self.sb.block_offset(block), &mut block_buf)
                .map_err(|_| Errno::EIO)?;

            let entries = disk::parse_dirents(&block_buf);
            let Some(idx) = entries.iter().position(|e| e.name == name) else {
                continue;
            };
            let target = &entries[idx];

            if idx == 0 {
                // Primeiro registro do bloco: marca como vazio.
                write_u32_le(&mut block_buf, target.offset, 0);
            } else {
                // Funde o registro no anterior, esticando o rec_len
                // até o fim do registro removido (cobre eventuais
                // entradas vazias no meio).
                let prev = &entries[idx - 1];
                let merged = (target.offset + target.rec_len as usize - prev.offset) as u16;
                write_u16_le(&mut block_buf, prev.offset + 4, merged);
            }

            return self
                .dev
                .write_at(self.sb.block_offset(block), &block_buf)
                .map_err(|_| Errno::EIO);
        }

        Err(Errno::ENOENT)
    }

    fn readlink(&self, tail: &str) -> SysResult<String> {
        let (num, _) = self.resolve(tail)?;
        let inode = self.read_inode(num)?;
        self.symlink_target(&inode)
    }
}

/// Monta o disco primário como raiz do namespace.
pub fn mount_root(dev: &'static dyn BlockDevice) -> SysResult<()> {
    let fs = Ext2Fs::mount(dev, "/dev/ide1")?;
    crate::kinfo!("ext2", "raiz montada de {}", fs.device_name);
    let fs: &'static Ext2Fs = Box::leak(Box::new(fs));
    vfs::mount("/", "/dev/ide1", "ext2", fs);
    Ok(())
}
