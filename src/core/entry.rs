//! Entry point lógico do kernel.
//!
//! Chamado pelo trampolim assembly do binário com o magic do multiboot
//! em EAX e o ponteiro de informações em EBX, já na stack de boot.
//!
//! Ordem de bring-up (estrita, cada passo depende dos anteriores):
//! serial → GDT → IDT/dispatcher → handoff multiboot → memória (pmm,
//! paging, valloc, heap) → PIC/PIT → syscalls → discos/VFS/fs
//! sintético → init via ELF → interrupções ligadas (o scheduler assume
//! no primeiro tick; este contexto vira a task idle).

use crate::arch::Cpu;

#[no_mangle]
pub extern "C" fn kernel_main(magic: u32, info_addr: u32) -> ! {
    // 1. Serial primeiro: sem ela não há logs de nada.
    crate::drivers::serial::init();
    crate::kinfo!("kmain", "Brasa v{}", env!("CARGO_PKG_VERSION"));

    // 2. Segmentação + tabela de interrupções.
    unsafe {
        crate::arch::platform::gdt::init();
        crate::arch::platform::idt::init();
    }
    crate::interrupts::init();

    // 3. Handoff do multiboot: valida magic, memória mínima e mapa.
    let boot = match unsafe { crate::core::handoff::parse(magic, info_addr as usize) } {
        Ok(boot) => boot,
        Err(msg) => panic!("handoff multiboot inválido: {}", msg),
    };
    crate::kinfo!(
        "kmain",
        "{} MiB de RAM, {} regiões no mapa",
        boot.total_bytes() / (1024 * 1024),
        boot.region_count
    );

    // 4. Memória: frames, paging, contexto do kernel, heap.
    unsafe {
        crate::mm::init(&boot);
    }

    // 5. Controladores de interrupção e o tick.
    crate::drivers::pic::init();
    crate::drivers::pit::init();

    // 6. Tabela de syscalls (gate 0x80).
    crate::syscall::init();

    // 7. Framebuffer (descritor para o console externo) e arquivos.
    crate::drivers::video::init(boot.framebuffer);
    crate::fs::init();

    crate::sched::scheduler::init();

    // 8. Self-tests, se compilados: rodam com tudo de pé, antes do
    // PID 1.
    #[cfg(feature = "self_test")]
    {
        crate::mm::test::run_memory_tests();
        crate::fs::test::run_fs_tests();
    }

    // 9. Primeira task de usuário.
    match crate::sched::exec::spawn_init("/sbin/init") {
        Ok(pid) => crate::kinfo!("kmain", "init escalonado (pid {})", pid),
        Err(e) => {
            crate::kerror!("kmain", "sem init: {:?}", e);
            panic!("não foi possível carregar /sbin/init");
        }
    }

    // 10. Habilita interrupções: o próximo tick entrega o CPU ao
    // scheduler e este contexto vira a task idle.
    crate::kinfo!("kmain", "interrupções habilitadas; sistema ativo");
    Cpu::enable_interrupts();

    loop {
        Cpu::halt();
    }
}
