use serde::Deserialize;
use std::{collections::BTreeMap, env, fs, path::PathBuf};

/// `flags.json`: section name -> (constant name -> literal value)
#[derive(Deserialize)]
struct Flags(BTreeMap<String, BTreeMap<String, String>>);

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let flags_path = PathBuf::from(manifest_dir).join("../../flags.json");
    let flags_str = fs::read_to_string(&flags_path)
        .unwrap_or_else(|err| panic!("Cannot read {}: {}", flags_path.display(), err));
    let flags: Flags = serde_json::from_str(&flags_str)
        .unwrap_or_else(|err| panic!("Malformed {}: {}", flags_path.display(), err));
    make_flags(&flags);
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../../flags.json");
}

fn make_flags(flags: &Flags) {
    let mut s = String::new();
    for (section, values) in &flags.0 {
        s += format!("// [{}]\n", section).as_str();
        for (key, value) in values {
            let value = value.trim().replace('_', "");
            if value.parse::<usize>().is_err() {
                panic!("Flag '{}' in section '{}' is not an unsigned integer.", key, section);
            }
            s += format!("pub const {}: usize = {};\n", key, value).as_str();
        }
    }
    let out_dir = env::var("OUT_DIR").unwrap();
    let path = PathBuf::from(out_dir).join("build_flags.rs");
    fs::write(path, s).unwrap();
}
