use std::{env, path::PathBuf};

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");
    let kernel_dir = PathBuf::from(manifest_dir);

    let linker_script = kernel_dir.join("src/arch/x86/link.ld");
    println!("cargo:rustc-link-arg=-T{}", linker_script.display());
    println!("cargo:rerun-if-changed=src/arch/x86/link.ld");
    println!("cargo:rerun-if-changed=i686-ferrite.json");
}
