fn main() {
    // Shaders are embedded with include_str!
    println!("cargo:rerun-if-changed=shaders/cells_oit.wgsl");
    println!("cargo:rerun-if-changed=shaders/anatomy_oit.wgsl");
    println!("cargo:rerun-if-changed=shaders/oit_resolve.wgsl");
    println!("cargo:rerun-if-changed=shaders/oit_common.wgsl");

    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("windows") {
        let mut res = winres::WindowsResource::new();
        let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") else {
            return;
        };
        let icon_path = std::path::Path::new(&manifest_dir).join("assets").join("icon.ico");

        if let Some(icon) = icon_path.to_str().filter(|_| icon_path.exists()) {
            res.set_icon(icon);
        }

        if let Err(e) = res.compile() {
            println!("cargo:warning=failed to embed Windows resources: {e}");
        }
    }
}
