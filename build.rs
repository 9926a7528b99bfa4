use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Linker scripts only apply to the STM32 image; host builds and tests skip them.
    if env::var_os("CARGO_FEATURE_FIRMWARE").is_some() {
        println!("cargo:rustc-link-arg-bins=--nmagic");
        println!("cargo:rustc-link-arg-bins=-Tlink.x");
        println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
    }
}
