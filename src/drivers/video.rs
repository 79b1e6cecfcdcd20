//! Captura do descritor de framebuffer linear do multiboot.
//!
//! O núcleo não desenha nada: só guarda o descritor e expõe para o
//! driver de console externo e para `/dev/fb`.

use crate::core::handoff::FramebufferInfo;
use spin::Mutex;

static FRAMEBUFFER: Mutex<Option<FramebufferInfo>> = Mutex::new(None);

pub fn init(fb: Option<FramebufferInfo>) {
    match fb {
        Some(info) => {
            crate::kinfo!(
                "video",
                "framebuffer {}x{} bpp={} em {:#x}",
                info.width,
                info.height,
                info.bpp,
                info.addr
            );
            *FRAMEBUFFER.lock() = Some(info);
        }
        None => {
            crate::kwarn!("video", "loader não passou framebuffer linear");
        }
    }
}

/// Descritor do framebuffer, se o loader forneceu um.
pub fn framebuffer() -> Option<FramebufferInfo> {
    *FRAMEBUFFER.lock()
}
