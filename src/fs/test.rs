//! Self-tests do VFS, pipes e ext2 (feature `self_test`).
//!
//! O teste de ext2 monta uma imagem sintética num RamDisk: superblock,
//! um blockgroup, inode raiz com dois filhos (arquivo e symlink).

use super::block::{BlockDevice, RamDisk};
use super::ext2::disk as ext2disk;
use super::ext2::Ext2Fs;
use super::pipe::{PipeEnd, PIPE_BUFFER_SIZE};
use super::vfs::{self, FileType, OpenFlags, VfsOps};
use crate::klib::endian::{write_u16_le, write_u32_le};
use crate::klib::test_framework::{run_test_suite, TestCase, TestResult};
use crate::syscall::error::Errno;
use crate::test_assert;
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

pub fn run_fs_tests() {
    run_test_suite("vfs", VFS_TESTS);
    run_test_suite("pipe", PIPE_TESTS);
    run_test_suite("ext2", EXT2_TESTS);
}

const VFS_TESTS: &[TestCase] = &[
    TestCase::new("vfs_prefixo_mais_longo", test_longest_prefix),
    TestCase::new("vfs_normalize", test_normalize),
];

const PIPE_TESTS: &[TestCase] = &[
    TestCase::new("pipe_backpressure_efbig", test_pipe_backpressure),
    TestCase::new("pipe_eof_apos_fechar_escrita", test_pipe_eof),
];

const EXT2_TESTS: &[TestCase] = &[TestCase::new("ext2_imagem_sintetica", test_ext2_image)];

fn test_longest_prefix() -> TestResult {
    let mounts = ["/", "/mnt/a", "/mnt"];
    test_assert!(
        vfs::best_prefix(mounts.iter().copied(), "/mnt/a/x") == Some("/mnt/a")
    );
    test_assert!(vfs::best_prefix(mounts.iter().copied(), "/mnt/b/x") == Some("/mnt"));
    test_assert!(vfs::best_prefix(mounts.iter().copied(), "/etc/passwd") == Some("/"));
    test_assert!(vfs::best_prefix(mounts.iter().copied(), "/mntx") == Some("/"));
    TestResult::Pass
}

fn test_normalize() -> TestResult {
    use vfs::path::normalize;
    test_assert!(normalize("/usr/bin", "../lib") == "/usr/lib");
    test_assert!(normalize("/", "a/./b//c/..") == "/a/b");
    test_assert!(normalize("/", "../..") == "/");
    TestResult::Pass
}

/// Escrever PIPE_BUFFER_SIZE cabe; um byte a mais falha com EFBIG; a
/// leitura devolve exatamente o que entrou.
fn test_pipe_backpressure() -> TestResult {
    let (read_end, write_end) = PipeEnd::pair();

    let big = vec![0x42u8; PIPE_BUFFER_SIZE];
    test_assert!(write_end.write(&big) == Ok(PIPE_BUFFER_SIZE));
    test_assert!(write_end.write(&[0x43]) == Err(Errno::EFBIG));

    let mut out = vec![0u8; PIPE_BUFFER_SIZE];
    let mut got = 0usize;
    while got < PIPE_BUFFER_SIZE {
        match read_end.read(&mut out[got..], true) {
            Ok(n) => got += n,
            Err(_) => return TestResult::Fail,
        }
    }
    test_assert!(out.iter().all(|&b| b == 0x42));

    // Vazio de novo: non-blocking devolve EAGAIN.
    test_assert!(read_end.read(&mut out, true) == Err(Errno::EAGAIN));
    TestResult::Pass
}

fn test_pipe_eof() -> TestResult {
    let (read_end, write_end) = PipeEnd::pair();

    test_assert!(write_end.write(b"fim") == Ok(3));
    drop(write_end);

    let mut buf = [0u8; 8];
    // Drena o que sobrou...
    test_assert!(read_end.read(&mut buf, true) == Ok(3));
    // ... e depois EOF, não EAGAIN.
    test_assert!(read_end.read(&mut buf, true) == Ok(0));
    TestResult::Pass
}

// ---------------------------------------------------------------------
// Imagem ext2 sintética
// ---------------------------------------------------------------------

const BS: usize = 1024;
const INODE_FILE: u32 = 12;
const INODE_LINK: u32 = 13;

fn put_inode(img: &mut [u8], num: u32, mode: u16, size: u32, first_block: u32) {
    // Tabela de inodes no bloco 4; 128 bytes por inode.
    let base = 4 * BS + ((num - 1) as usize) * 128;
    write_u16_le(img, base, mode);
    write_u32_le(img, base + 4, size);
    write_u16_le(img, base + 26, 1); // link_count
    write_u32_le(img, base + 40, first_block);
}

fn put_dirent(img: &mut [u8], offset: usize, inode: u32, rec_len: u16, dtype: u8, name: &str) {
    write_u32_le(img, offset, inode);
    write_u16_le(img, offset + 4, rec_len);
    img[offset + 6] = name.len() as u8;
    img[offset + 7] = dtype;
    img[offset + 8..offset + 8 + name.len()].copy_from_slice(name.as_bytes());
}

/// 64 blocos de 1 KiB: superblock, blockgroup, tabela de inodes no
/// bloco 4, raiz no 6, conteúdo de arquivo no 7.
fn build_image() -> Vec<u8> {
    let mut img = vec![0u8; 64 * BS];

    // Superblock (byte 1024).
    let sb = BS;
    write_u32_le(&mut img, sb, 16); // inode_count
    write_u32_le(&mut img, sb + 4, 64); // block_count
    write_u32_le(&mut img, sb + 20, 1); // first_data_block
    write_u32_le(&mut img, sb + 24, 0); // log_block_size -> 1024
    write_u32_le(&mut img, sb + 32, 64); // blocks_per_group
    write_u32_le(&mut img, sb + 40, 16); // inodes_per_group
    write_u16_le(&mut img, sb + 52, 0); // mount_count
    write_u16_le(&mut img, sb + 56, ext2disk::SUPERBLOCK_MAGIC);
    write_u16_le(&mut img, sb + 58, ext2disk::STATE_CLEAN);
    write_u32_le(&mut img, sb + 76, 1); // revisão
    write_u16_le(&mut img, sb + 88, 128); // inode_size

    // Blockgroup 0 (bloco 2): inode_table no bloco 4.
    let bg = 2 * BS;
    write_u32_le(&mut img, bg, 3); // block_bitmap
    write_u32_le(&mut img, bg + 4, 3); // inode_bitmap
    write_u32_le(&mut img, bg + 8, 4); // inode_table

    // Inodes: raiz (2), arquivo (12), symlink (13).
    put_inode(&mut img, ext2disk::ROOT_INODE, ext2disk::IFDIR | 0o755, BS as u32, 6);
    put_inode(&mut img, INODE_FILE, ext2disk::IFREG | 0o644, 4, 7);
    put_inode(&mut img, INODE_LINK, ext2disk::IFLNK | 0o777, 8, 0);
    // Alvo inline do symlink na área de ponteiros de bloco.
    let link_base = 4 * BS + (INODE_LINK as usize - 1) * 128;
    img[link_base + 40..link_base + 48].copy_from_slice(b"hostname");

    // Diretório raiz (bloco 6).
    let root = 6 * BS;
    put_dirent(&mut img, root, 2, 12, 2, ".");
    put_dirent(&mut img, root + 12, 2, 12, 2, "..");
    put_dirent(&mut img, root + 24, INODE_FILE, 16, 1, "hostname");
    put_dirent(&mut img, root + 40, INODE_LINK, (BS - 40) as u16, 7, "link");

    // Conteúdo do arquivo (bloco 7).
    img[7 * BS..7 * BS + 4].copy_from_slice(b"host");

    img
}

fn test_ext2_image() -> TestResult {
    let disk: &'static RamDisk = Box::leak(Box::new(RamDisk::new(build_image())));

    let fs = match Ext2Fs::mount(disk, "ramdisk") {
        Ok(fs) => fs,
        Err(e) => {
            crate::kerror!("test", "mount da imagem falhou: {:?}", e);
            return TestResult::Fail;
        }
    };

    // Mount count foi reescrito no disco.
    let mut raw = [0u8; 2];
    test_assert!(disk.read_at(1024 + 52, &mut raw).is_ok());
    test_assert!(u16::from_le_bytes(raw) == 1);

    // stat + leitura idempotente.
    let node = match fs.open("hostname", OpenFlags::RDONLY) {
        Ok(n) => n,
        Err(_) => return TestResult::Fail,
    };
    test_assert!(node.file_type == FileType::Regular);
    test_assert!(node.size == 4);

    let mut first = [0u8; 4];
    let mut second = [0u8; 4];
    test_assert!(fs.read(&node, 0, &mut first, OpenFlags::RDONLY) == Ok(4));
    test_assert!(fs.read(&node, 0, &mut second, OpenFlags::RDONLY) == Ok(4));
    test_assert!(&first == b"host" && first == second);

    // Seek + read == leitura sequencial.
    let mut tail = [0u8; 2];
    test_assert!(fs.read(&node, 2, &mut tail, OpenFlags::RDONLY) == Ok(2));
    test_assert!(&tail == &first[2..4]);

    // Symlink inline: alvo relativo aponta para o mesmo conteúdo.
    let target = match fs.readlink("link") {
        Ok(t) => t,
        Err(_) => return TestResult::Fail,
    };
    test_assert!(target == "hostname");
    let via_link = match fs.open(&target, OpenFlags::RDONLY) {
        Ok(n) => n,
        Err(_) => return TestResult::Fail,
    };
    let mut linked = [0u8; 4];
    test_assert!(fs.read(&via_link, 0, &mut linked, OpenFlags::RDONLY) == Ok(4));
    test_assert!(linked == first);

    // getdents enxerga os dois nomes.
    let root = match fs.open("", OpenFlags::RDONLY) {
        Ok(n) => n,
        Err(_) => return TestResult::Fail,
    };
    let entries = match fs.getdents(&root) {
        Ok(e) => e,
        Err(_) => return TestResult::Fail,
    };
    test_assert!(entries.iter().any(|e| e.name == "hostname"));
    test_assert!(entries.iter().any(|e| e.name == "link"));

    // chmod preserva os bits de tipo.
    test_assert!(fs.chmod("hostname", 0o600).is_ok());
    let node2 = match fs.stat("hostname") {
        Ok(n) => n,
        Err(_) => return TestResult::Fail,
    };
    test_assert!(node2.mode == 0o600);
    test_assert!(node2.file_type == FileType::Regular);

    // unlink remove o dirent; o vizinho sobrevive.
    test_assert!(fs.unlink("link").is_ok());
    test_assert!(matches!(fs.stat("link"), Err(Errno::ENOENT)));
    test_assert!(fs.stat("hostname").is_ok());

    TestResult::Pass
}
