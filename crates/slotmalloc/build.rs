fn main() {
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    let exporting = std::env::var_os("CARGO_FEATURE_EXPORT_SYMBOLS").is_some();

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=linker/version_script.lds");

    // Only the preloadable build restricts the exported surface; the rlib and
    // the test harness keep default visibility.
    if target_os == "linux" && exporting {
        let script = format!("{}/linker/version_script.lds", manifest_dir);
        println!(
            "cargo:rustc-cdylib-link-arg=-Wl,--version-script={}",
            script
        );
    }
}
