//! Build script for fdiag-core
//!
//! Produces the compile-time defaults consumed by `config::defaults`:
//! 1. Start with library defaults
//! 2. If FDIAG_CONFIG_RS env var is set, read overrides from that file
//! 3. Overrides replace defaults by name
//! 4. Write OUT_DIR/fdiag_defaults.rs
//!
//! Only the values that differ need to appear in the override file.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

/// One tunable that ends up as a `pub const` in the generated file
struct Tunable {
    name: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

const TUNABLES: &[Tunable] = &[
    Tunable {
        name: "LOG_ENABLED",
        rust_type: "bool",
        default_value: "true",
    },
    Tunable {
        name: "DEBUG_LOG_ENABLED",
        rust_type: "bool",
        default_value: "true",
    },
    Tunable {
        name: "LOG_STDOUT",
        rust_type: "bool",
        default_value: "true",
    },
    Tunable {
        name: "LOG_FLUSH",
        rust_type: "bool",
        default_value: "false",
    },
    Tunable {
        name: "SYSLOG",
        rust_type: "bool",
        default_value: "false",
    },
    Tunable {
        name: "LOG_BUFFER_SIZE",
        rust_type: "usize",
        default_value: "384",
    },
    Tunable {
        name: "ERROR_CONTEXT_ENABLED",
        rust_type: "bool",
        default_value: "true",
    },
    Tunable {
        name: "ERROR_CONTEXT_DEPTH",
        rust_type: "usize",
        default_value: "32",
    },
    Tunable {
        name: "GUARD_STACK_SIZE",
        rust_type: "usize",
        default_value: "8 * 1024 * 1024", // 8MB, reserved lazily
    },
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = Path::new(&out_dir).join("fdiag_defaults.rs");

    let mut values: HashMap<&str, String> = TUNABLES
        .iter()
        .map(|t| (t.name, t.default_value.to_string()))
        .collect();

    if let Ok(user_path) = env::var("FDIAG_CONFIG_RS") {
        println!("cargo:rerun-if-changed={}", user_path);

        match fs::read_to_string(&user_path) {
            Ok(content) => {
                apply_overrides(&content, &mut values);
                println!("cargo:warning=Using fdiag overrides: {}", user_path);
            }
            Err(e) => {
                println!(
                    "cargo:warning=Failed to read FDIAG_CONFIG_RS ({}): {}",
                    user_path, e
                );
            }
        }
    }

    println!("cargo:rerun-if-env-changed=FDIAG_CONFIG_RS");

    let output = render(&values);
    fs::write(&dest_path, &output).expect("Failed to write fdiag defaults");
}

/// Read `pub const NAME: TYPE = VALUE;` lines and replace known tunables
fn apply_overrides(content: &str, values: &mut HashMap<&str, String>) {
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("//") || !line.starts_with("pub const ") {
            continue;
        }

        let Some((name, value)) = split_const(line) else {
            continue;
        };

        match TUNABLES.iter().find(|t| t.name == name) {
            Some(tunable) => {
                values.insert(tunable.name, value);
            }
            None => println!("cargo:warning=Unknown fdiag tunable: {}", name),
        }
    }
}

/// Split a const line into (name, value)
fn split_const(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("pub const ")?.trim();

    let colon = rest.find(':')?;
    let name = rest[..colon].trim().to_string();

    let eq = rest.find('=')?;
    let semi = rest.rfind(';').unwrap_or(rest.len());
    let value = rest[eq + 1..semi].trim().to_string();

    Some((name, value))
}

fn render(values: &HashMap<&str, String>) -> String {
    let mut output = String::new();

    output.push_str("// Auto-generated by build.rs - do not edit\n");
    if env::var("FDIAG_CONFIG_RS").is_ok() {
        output.push_str("// Library defaults with FDIAG_CONFIG_RS overrides\n\n");
    } else {
        output.push_str("// Library defaults\n\n");
    }

    for tunable in TUNABLES {
        let value = &values[tunable.name];
        output.push_str(&format!(
            "pub const {}: {} = {};\n",
            tunable.name, tunable.rust_type, value
        ));
    }

    output
}

