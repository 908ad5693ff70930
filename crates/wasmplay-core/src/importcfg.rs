//! Import configuration generation.
//!
//! The compiler and linker resolve imports through a text file of
//! `packagefile <import>=<archive>` lines. The compile variant lists the
//! source's imports that the manifest knows; the link variant additionally
//! binds the main package to the archive the compile stage just produced.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::manifest::Manifest;

/// Import path the toolchain assigns to a package built from loose files.
pub const MAIN_PACKAGE: &str = "command-line-arguments";

static QUOTED_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    // optional alias (identifier, `_` or `.`), then a quoted path
    Regex::new(r#"^(?:[A-Za-z_][A-Za-z0-9_]*\s+|\.\s+)?"([^"]+)"\s*(?://.*)?$"#)
        .expect("import regex is valid")
});

/// Which packages the link-time configuration lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkScope {
    /// Only the source's direct imports.
    #[default]
    Direct,
    /// Every package in the manifest, for linkers that need the full
    /// dependency closure spelled out.
    Closure,
}

fn strip_line_comment(line: &str) -> &str {
    // `//` only starts a comment outside a quoted path
    match line.find("//") {
        Some(idx) if line[..idx].matches('"').count() % 2 == 0 => line[..idx].trim_end(),
        _ => line,
    }
}

/// Collect the import paths of a source file, in order, without duplicates.
///
/// Line-oriented: handles `import "x"`, `import alias "x"` and
/// `import ( ... )` blocks. Scanning stops at the first top-level
/// declaration after the package clause.
pub fn parse_imports(source: &str) -> Vec<String> {
    let mut imports: Vec<String> = Vec::new();
    let mut push = |path: &str| {
        if !imports.iter().any(|p| p == path) {
            imports.push(path.to_string());
        }
    };

    let mut in_block = false;
    let mut in_comment = false;

    for raw in source.lines() {
        let mut line = raw.trim();

        if in_comment {
            match line.find("*/") {
                Some(end) => {
                    in_comment = false;
                    line = line[end + 2..].trim();
                }
                None => continue,
            }
        }
        if let Some(rest) = line.strip_prefix("/*") {
            match rest.find("*/") {
                Some(end) => line = rest[end + 2..].trim(),
                None => {
                    in_comment = true;
                    continue;
                }
            }
        }

        let line = strip_line_comment(line);
        if line.is_empty() {
            continue;
        }

        if in_block {
            if line.starts_with(')') {
                in_block = false;
                continue;
            }
            if let Some(caps) = QUOTED_IMPORT.captures(line) {
                push(&caps[1]);
            }
            continue;
        }

        if line.starts_with("package ") {
            continue;
        }
        let Some(rest) = line.strip_prefix("import") else {
            // first declaration that isn't an import ends the import section
            break;
        };
        let rest = rest.trim_start();
        if let Some(inner) = rest.strip_prefix('(') {
            let inner = inner.trim();
            if inner.starts_with(')') {
                continue;
            }
            // `import ( "fmt" )` on one line
            if let Some(body) = inner.strip_suffix(')') {
                if let Some(caps) = QUOTED_IMPORT.captures(body.trim()) {
                    push(&caps[1]);
                }
                continue;
            }
            in_block = true;
            if let Some(caps) = QUOTED_IMPORT.captures(inner) {
                push(&caps[1]);
            }
        } else if let Some(caps) = QUOTED_IMPORT.captures(rest) {
            push(&caps[1]);
        }
    }

    imports
}

/// A generated import configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportConfig {
    entries: Vec<(String, String)>,
}

impl ImportConfig {
    /// Compile-time configuration for `imports`.
    pub fn compile(imports: &[String], manifest: &Manifest) -> Self {
        let mut cfg = Self::default();
        for import in imports {
            match manifest.get(import) {
                Some(archive) => cfg.entries.push((import.clone(), archive.to_string())),
                None => log::warn!("import '{}' not in manifest, skipping", import),
            }
        }
        cfg
    }

    /// Link-time configuration: the main package first, then the imports
    /// selected by `scope`.
    pub fn link(
        imports: &[String],
        manifest: &Manifest,
        main_archive: &str,
        scope: LinkScope,
    ) -> Self {
        let mut cfg = Self {
            entries: vec![(MAIN_PACKAGE.to_string(), main_archive.to_string())],
        };
        match scope {
            LinkScope::Direct => cfg.entries.extend(Self::compile(imports, manifest).entries),
            LinkScope::Closure => cfg.entries.extend(
                manifest
                    .iter()
                    .map(|(import, archive)| (import.to_string(), archive.to_string())),
            ),
        }
        cfg
    }

    /// Parse an existing configuration, as written by the toolchain into
    /// its work directory. Comments and non-`packagefile` directives are
    /// ignored.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| line.trim().strip_prefix("packagefile "))
            .filter_map(|rest| rest.split_once('='))
            .map(|(import, archive)| (import.trim().to_string(), archive.trim().to_string()))
            .filter(|(import, archive)| !import.is_empty() && !archive.is_empty())
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite every archive path, keeping import paths.
    pub fn map_archives(&self, mut f: impl FnMut(&str) -> String) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|(import, archive)| (import.clone(), f(archive)))
                .collect(),
        }
    }
}

impl fmt::Display for ImportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (import, archive) in &self.entries {
            writeln!(f, "packagefile {}={}", import, archive)?;
        }
        Ok(())
    }
}

/// Compile configuration text for a source file.
pub fn generate(source: &str, manifest: &Manifest) -> String {
    ImportConfig::compile(&parse_imports(source), manifest).to_string()
}
