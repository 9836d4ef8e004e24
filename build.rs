fn main() {
    // ── macOS: CoreBluetooth needs an Info.plist ──────────────────────────────
    //
    // A bare CLI binary has no app bundle, so CBCentralManager reports
    // "unauthorised" and the sensor is never found.  Linking the plist into
    // the `__TEXT,__info_plist` section makes macOS read it as if it came from
    // a bundle, including NSBluetoothAlwaysUsageDescription.
    //
    // `CARGO_CFG_TARGET_OS` is the target OS, so this also applies when
    // cross-compiling for macOS from another host.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("macos") {
        return;
    }

    let dir = std::env::var("CARGO_MANIFEST_DIR")
        .expect("CARGO_MANIFEST_DIR must be set by Cargo");
    let plist = format!("{dir}/Info.plist");

    // ld … -sectcreate __TEXT __info_plist <plist>
    for arg in ["-sectcreate", "__TEXT", "__info_plist", plist.as_str()] {
        println!("cargo:rustc-link-arg={arg}");
    }
    println!("cargo:rerun-if-changed=Info.plist");
}
