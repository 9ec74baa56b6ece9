// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! `tael render`: compile a template and render it with a JSON scope.

use crate::json_to_scope;
use anyhow::Context;
use std::io::Read;
use std::path::{Path, PathBuf};
use tael::{Settings, Template, ValueMap};

/// Runs the render command.
pub fn run(
    template_path: &Path,
    data: Option<&str>,
    roots: Vec<PathBuf>,
    strict: bool,
    trim: bool,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let vars = load_scope(data)?;

    let mut settings = Settings::from_env();
    settings.strict = strict;
    settings.trim_attribute_space = trim;
    settings.search_path = roots;
    if let Some(parent) = template_path.parent() {
        settings.search_path.push(parent.to_path_buf());
    }

    let template = Template::from_file(template_path, settings)
        .with_context(|| format!("cannot open template {}", template_path.display()))?;
    let rendered = template
        .render(vars)
        .with_context(|| format!("cannot render {}", template_path.display()))?;

    match output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("cannot write {}", path.display()))?,
        None => print!("{}", rendered),
    }
    Ok(())
}

fn load_scope(data: Option<&str>) -> anyhow::Result<ValueMap> {
    let Some(data) = data else {
        return Ok(ValueMap::new());
    };
    let text = if data == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("cannot read data from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(data).with_context(|| format!("cannot read {}", data))?
    };
    let json: serde_json::Value =
        serde_json::from_str(&text).context("template data is not valid JSON")?;
    json_to_scope(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_render_to_file() {
        let dir = TempDir::new().unwrap();
        let template = dir.path().join("page.pt");
        let data = dir.path().join("data.json");
        let out = dir.path().join("out.html");
        fs::write(&template, r#"<p tal:content="name">x</p>"#).unwrap();
        fs::write(&data, r#"{"name": "World"}"#).unwrap();

        run(
            &template,
            Some(data.to_str().unwrap()),
            vec![],
            false,
            false,
            Some(&out),
        )
        .unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "<p>World</p>");
    }
}
