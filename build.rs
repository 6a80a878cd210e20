use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

const KEY_PREFIX: &str = "UNDDIT_";

/// Contents of the plain string literals on one line of Rust source.
fn string_literals(line: &str) -> impl Iterator<Item = &str> {
    let code = line.split("//").next().unwrap_or_default();
    code.split('"').skip(1).step_by(2)
}

fn is_env_key(literal: &str) -> bool {
    literal.len() > KEY_PREFIX.len()
        && literal.starts_with(KEY_PREFIX)
        && literal
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

fn scan_dir(dir: &Path, keys: &mut BTreeSet<String>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            scan_dir(&path, keys)?;
            continue;
        }
        if path.extension().is_none_or(|ext| ext != "rs") {
            continue;
        }
        let source = fs::read_to_string(&path)?;
        keys.extend(
            source
                .lines()
                .flat_map(string_literals)
                .filter(|literal| is_env_key(literal))
                .map(str::to_string),
        );
    }
    Ok(())
}

/// Writes `UNDDIT_ENV_KEYS`: every whole `"UNDDIT_*"` literal under src/,
/// which is every env key the binary reads.
fn generate() -> io::Result<()> {
    let mut keys = BTreeSet::new();
    scan_dir(Path::new("src"), &mut keys)?;

    let out_dir = env::var("OUT_DIR").map_err(io::Error::other)?;
    let mut out = fs::File::create(Path::new(&out_dir).join("unddit_env_keys.rs"))?;
    writeln!(out, "pub const UNDDIT_ENV_KEYS: &[&str] = &[")?;
    for key in &keys {
        writeln!(out, "    {key:?},")?;
    }
    writeln!(out, "];")
}

fn main() {
    if let Err(err) = generate() {
        panic!("failed to generate the env key list: {err}");
    }
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
}
