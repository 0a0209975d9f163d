use std::env;
use std::fs;
use std::path::Path;

/// The four helper variants shipped inside the orchestrator. Real binaries
/// are dropped into assets/syncd/ by the release build; when a variant is
/// absent an empty placeholder is embedded instead, which the bootstrap
/// rejects at runtime with a typed error.
const VARIANTS: [&str; 4] = [
    "syncd_linux_amd64",
    "syncd_linux_arm64",
    "syncd_darwin_amd64",
    "syncd_darwin_arm64",
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");

    for variant in VARIANTS {
        let src = Path::new("assets/syncd").join(variant);
        let dst = Path::new(&out_dir).join(variant);

        if src.is_file() {
            fs::copy(&src, &dst).expect("failed to copy embedded syncd binary");
        } else {
            fs::write(&dst, []).expect("failed to write syncd placeholder");
        }
        println!("cargo:rerun-if-changed=assets/syncd/{variant}");
    }
}
