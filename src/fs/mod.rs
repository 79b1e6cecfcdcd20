//! Sistema de arquivos: VFS, ext2, fs sintético, pipes.

pub mod block;
pub mod ext2;
pub mod fd;
pub mod gfxbus;
pub mod pipe;
pub mod sysfs;
pub mod vfs;

#[cfg(feature = "self_test")]
pub mod test;

/// Sobe a pilha de arquivos: fs sintético (/sys, /dev), discos ATA e o
/// ext2 root.
pub fn init() {
    sysfs::init();
    gfxbus::init();

    // Discos detectados viram /dev/ide1, /dev/ide2.
    let mut found_primary = false;
    if crate::drivers::ata::PRIMARY.probe() {
        sysfs::add_dev("ide1", &crate::drivers::ata::IDE1_DEV);
        found_primary = true;
    }
    if crate::drivers::ata::SECONDARY.probe() {
        sysfs::add_dev("ide2", &crate::drivers::ata::IDE2_DEV);
    }

    if found_primary {
        match ext2::mount_root(&crate::drivers::ata::PRIMARY) {
            Ok(()) => {}
            Err(e) => crate::kerror!("fs", "mount do ext2 root falhou: {:?}", e),
        }
    } else {
        crate::kwarn!("fs", "nenhum disco ATA; sem root ext2");
    }
}
