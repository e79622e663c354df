use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// 内置组件清单目录：<平台版本>/<组件>.json
const COMPONENT_MAPS_DIR: &str = "src/services/composer";

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    entries.sort();
    entries
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let maps_dir = manifest_dir.join(COMPONENT_MAPS_DIR);
    println!("cargo:rerun-if-changed={}", maps_dir.to_str().unwrap());

    let mut table = String::from("static COMPONENT_MAPS: &[(&str, &str, &str)] = &[\n");
    for version_dir in sorted_entries(&maps_dir).into_iter().filter(|p| p.is_dir()) {
        let version = version_dir.file_name().unwrap().to_str().unwrap().to_string();
        for file in sorted_entries(&version_dir) {
            if file.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            println!("cargo:rerun-if-changed={}", file.to_str().unwrap());
            let component = file.file_stem().unwrap().to_str().unwrap();
            writeln!(
                table,
                "    ({:?}, {:?}, include_str!({:?})),",
                version,
                component,
                file.to_str().unwrap()
            )
            .unwrap();
        }
    }
    table.push_str("];\n");

    let out = PathBuf::from(env::var("OUT_DIR").unwrap()).join("component_maps.rs");
    fs::write(out, table).unwrap();
}
