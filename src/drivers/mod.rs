//! Drivers mínimos consumidos pelo núcleo.
//!
//! O kernel só depende de quatro superfícies externas: saída serial
//! byte a byte (logs), tick de milissegundos (PIT), leitura/escrita de
//! blocos crus (ATA) e o descritor do framebuffer linear. Drivers
//! maiores (teclado, rede, console gráfico) vivem fora do núcleo e se
//! registram via `interrupts::register` e `fs::sysfs`.

pub mod ata;
pub mod pic;
pub mod pit;
pub mod serial;
pub mod video;
