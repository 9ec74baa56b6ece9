// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! `tael check`: compile a template and report diagnostics.

use std::path::{Path, PathBuf};
use tael::{Settings, Template};

/// Runs the check command. Exits non-zero through the returned error
/// when compilation fails.
pub fn run(template_path: &Path, roots: Vec<PathBuf>, strict: bool) -> anyhow::Result<()> {
    let mut settings = Settings::from_env();
    settings.strict = strict;
    settings.search_path = roots;
    // Eager mode compiles in the constructor, which is the whole point
    // of a check run.
    settings.eager = true;
    settings.validate = true;

    match Template::from_file(template_path, settings) {
        Ok(template) => {
            let program = template.program()?;
            println!(
                "{}: ok ({} macro(s))",
                template_path.display(),
                program.macros.len()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e);
            anyhow::bail!("{}: compilation failed", template_path.display())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_check_reports_failures() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.pt");
        let bad = dir.path().join("bad.pt");
        fs::write(&good, "<p>ok</p>").unwrap();
        fs::write(&bad, "<p></div>").unwrap();

        assert!(run(&good, vec![], false).is_ok());
        assert!(run(&bad, vec![], false).is_err());
    }

    #[test]
    fn test_strict_check() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.pt");
        fs::write(&path, r#"<p tal:bogus="1">x</p>"#).unwrap();

        assert!(run(&path, vec![], false).is_ok());
        assert!(run(&path, vec![], true).is_err());
    }
}
