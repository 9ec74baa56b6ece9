// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! `tael macros`: list the macros a template defines.

use anyhow::Context;
use std::path::Path;
use tael::{Settings, Template};

/// Runs the macros command.
pub fn run(template_path: &Path) -> anyhow::Result<()> {
    let template = Template::from_file(template_path, Settings::from_env())
        .with_context(|| format!("cannot open template {}", template_path.display()))?;
    let macros = template
        .macros()
        .with_context(|| format!("cannot compile {}", template_path.display()))?;

    let names = macros.names();
    if names.is_empty() {
        println!("{}: no macros", template_path.display());
        return Ok(());
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_macros_listing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("layout.pt");
        fs::write(
            &path,
            r#"<html metal:define-macro="main"><p metal:define-macro="row">r</p></html>"#,
        )
        .unwrap();
        assert!(run(&path).is_ok());
    }
}
