//! This build script handles:
//! - Exposing build-time information to the application.
//! - Copying `memory.x` to the output directory to allow the firmware to be
//!   created.
//!
//! ## Build-time information
//!
//! Package, git and toolchain details are written to `OUT_DIR/built.rs` and
//! included by `util::built`.
//!
//! ## `memory.x` file handling
//!
//! When building the firmware, this build script copies the appropriate
//! memory.x file from the `link/` dir into a directory where the linker can
//! find it at link time.  Host builds (used to run the protocol tests) skip
//! this step.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

// memory.x handling derived from embassy-rs examples.

#[cfg(any(feature = "pico", feature = "pico2"))]
use std::{env, fs::File, io::Write, path::PathBuf};

fn main() {
    // Expose build-time information to the application.

    // Re-run this build script if anything in git changes.
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");

    // Re-run this build script of DEFMT_LOG changes.
    println!("cargo:rerun-if-env-changed=DEFMT_LOG");

    // Get built-time information
    built::write_built_file().expect("Failed to acquire build-time information");

    #[cfg(any(feature = "pico", feature = "pico2"))]
    link_firmware();
}

#[cfg(any(feature = "pico", feature = "pico2"))]
fn link_firmware() {
    // RP2040 and RP235X use different memory.x files.  Ensure the build
    // script is re-run if the appropriate memory.x file changes.  Note that
    // neither file should be called memory.x, as then the linker will pick up
    // that file from our root directory, instead of the version we put in
    // OUT_DIR, below.
    #[cfg(feature = "pico")]
    let memory_x = {
        println!("cargo:rerun-if-changed=link/memory.rp2040.x");
        include_bytes!("link/memory.rp2040.x")
    };
    #[cfg(feature = "pico2")]
    let memory_x = {
        println!("cargo:rerun-if-changed=link/memory.rp235x.x");
        include_bytes!("link/memory.rp235x.x")
    };

    // Put `memory.x` in our output directory and ensure it's on the linker
    // search path.
    let out = &PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR not set"));
    File::create(out.join("memory.x"))
        .expect("Failed to create memory.x")
        .write_all(memory_x)
        .expect("Failed to write memory.x");
    println!("cargo:rustc-link-search={}", out.display());

    // Set embassy linker arguments for the binary.
    println!("cargo:rustc-link-arg=-v");
    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
    println!("cargo:rustc-link-arg-bins=-Tdevice.x");

    // Only RP2040 uses this linker file.
    #[cfg(feature = "pico")]
    println!("cargo:rustc-link-arg-bins=-Tlink-rp.x");
}
