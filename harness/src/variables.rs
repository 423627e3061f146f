// SPDX-FileCopyrightText: The eso-harness authors
//
// SPDX-License-Identifier: MIT

//! Reading default values out of Terraform `variables.tf` files.
//!
//! This is line-oriented text scraping, not an HCL parser: it understands
//! single-line `default = ...` assignments inside a `variable "name" { }`
//! block, which is how the examples declare their image settings.

use log::debug;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::config::TerraformVars;

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""((?:\\"|[^"])*)""#).expect("quoted-string regex is valid"));

pub fn extract_default_value(contents: &str, variable: &str) -> Option<String> {
    let header = format!("\"{variable}\"");
    let mut in_variable = false;

    for line in contents.lines().map(str::trim) {
        if line.starts_with("variable") && line.contains(&header) {
            in_variable = true;
            continue;
        }
        if !in_variable {
            continue;
        }

        if line.starts_with("default") {
            if let Some((_, raw)) = line.split_once('=') {
                return Some(parse_default(raw.trim()));
            }
        }

        if line == "}" {
            in_variable = false;
        }
    }
    None
}

fn parse_default(raw: &str) -> String {
    let value = if raw.starts_with('"') {
        match QUOTED.captures(raw).and_then(|c| c.get(1)) {
            Some(inner) => inner.as_str().replace("\\\"", "\""),
            None => raw.trim_matches('"').to_string(),
        }
    } else {
        raw.split('#').next().unwrap_or_default().trim().to_string()
    };
    value.trim_end_matches([' ', ',']).to_string()
}

/// Resolve a variable for an example: an explicit string input wins, then the
/// example's own `variables.tf`, then the repository root `variables.tf` two
/// levels up.
pub fn resolve_variable(
    overrides: &TerraformVars,
    example_dir: &Path,
    name: &str,
) -> Option<String> {
    if let Some(value) = overrides.get(name).and_then(|v| v.as_str()) {
        return Some(value.to_string());
    }

    let candidates = [
        example_dir.join("variables.tf"),
        example_dir.join("..").join("..").join("variables.tf"),
    ];
    for path in candidates {
        let Ok(contents) = std::fs::read_to_string(&path) else {
            debug!("Skipping unreadable {}", path.display());
            continue;
        };
        if let Some(value) = extract_default_value(&contents, name).filter(|v| !v.is_empty()) {
            debug!("Resolved {name}={value} from {}", path.display());
            return Some(value);
        }
    }
    None
}
