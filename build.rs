// ==================================================
// FILE: cellsim-rust/build.rs
// ==================================================

// 生成 C 头文件 include/cellsim.h；源码目录只读时改写到 OUT_DIR。
// 任何失败都只输出 cargo:warning，不阻断编译。

use std::env;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

const HEADER_NAME: &str = "cellsim.h";

fn write_header(bindings: &cbindgen::Bindings, path: &Path) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = File::create(path)?;
    bindings.write(BufWriter::new(file));
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=src/models.rs");

    let crate_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => return,
    };

    let bindings = match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("CELLSIM_H")
        .with_no_includes()
        .with_sys_include("stdint.h")
        .generate()
    {
        Ok(b) => b,
        Err(e) => {
            println!("cargo:warning=cbindgen skipped: {e}");
            return;
        }
    };

    let primary = crate_dir.join("include").join(HEADER_NAME);
    let Err(e) = write_header(&bindings, &primary) else {
        return;
    };
    println!("cargo:warning=cannot write {}: {e}", primary.display());

    let Some(out_dir) = env::var_os("OUT_DIR").map(PathBuf::from) else {
        return;
    };
    let fallback = out_dir.join(HEADER_NAME);
    match write_header(&bindings, &fallback) {
        Ok(()) => println!("cargo:warning=C header written to {}", fallback.display()),
        Err(e) => println!("cargo:warning=cannot write {}: {e}", fallback.display()),
    }
}
