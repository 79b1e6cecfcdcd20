fn main() {
    // Linka o binário com o layout multiboot (1 MiB, símbolos
    // __kernel_start/__kernel_end usados pelo PMM).
    println!("cargo:rustc-link-arg-bins=-Tlinker.ld");
    println!("cargo:rerun-if-changed=linker.ld");
}
