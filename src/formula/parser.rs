// src/formula/parser.rs

//! Formula file parsing and validation

use crate::error::{Error, Result};
use crate::filesystem::path::{sanitize_filename, sanitize_path};
use crate::formula::format::{Channel, Formula};
use crate::hash::Checksum;
use crate::pipeline::source::SourceLocator;
use std::collections::HashSet;
use std::path::Path;

/// Parse a formula from a TOML string
pub fn parse_formula(content: &str) -> Result<Formula> {
    toml::from_str(content).map_err(|e| Error::ParseError(format!("Invalid formula: {}", e)))
}

/// Parse a formula from a file
pub fn parse_formula_file(path: &Path) -> Result<Formula> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::IoError(format!("Failed to read formula file {}: {}", path.display(), e))
    })?;

    parse_formula(&content)
}

/// Validate a formula for completeness and correctness
///
/// Structural problems are errors. Anything the pipeline can still run
/// with is returned as a warning. A malformed source locator is only a
/// warning here: at run time it terminates the run as a fetch failure.
pub fn validate_formula(formula: &Formula) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    if formula.package.name.is_empty() {
        return Err(Error::InvalidFormula("Formula name cannot be empty".to_string()));
    }
    sanitize_filename(&formula.package.name).map_err(|_| {
        Error::InvalidFormula(format!(
            "Formula name '{}' must be a single path component",
            formula.package.name
        ))
    })?;

    if formula.channels().is_empty() {
        return Err(Error::InvalidFormula(
            "Formula must declare at least one source channel (stable or head)".to_string(),
        ));
    }

    if let Some(checksum) = &formula.source.checksum {
        Checksum::parse(checksum)?;
    }

    for channel in formula.channels() {
        if let Some(raw) = formula.locator(channel)
            && let Err(e) = SourceLocator::parse(&raw, formula.source.checksum.as_deref(), None)
        {
            warnings.push(format!("{} source will fail to fetch: {}", channel, e));
        }
    }

    let install = &formula.install;
    if install.artifacts.is_empty() && install.commands.is_empty() {
        return Err(Error::InvalidFormula(
            "Install procedure declares no artifacts and no install commands".to_string(),
        ));
    }
    if install.steps.is_empty() {
        warnings.push("Install procedure has no build steps".to_string());
    }
    if install
        .steps
        .iter()
        .chain(install.commands.iter())
        .any(|step| step.is_empty())
    {
        return Err(Error::InvalidFormula("Empty command in install procedure".to_string()));
    }

    for dir in &install.directories {
        sanitize_path(dir)?;
    }
    for link in &install.links {
        sanitize_path(&link.link)?;
        if link.target.is_empty() {
            return Err(Error::InvalidFormula(format!(
                "Link {} has an empty target",
                link.link
            )));
        }
    }
    if let Some(workdir) = &install.workdir {
        sanitize_path(workdir)?;
    }
    for artifact in &install.artifacts {
        sanitize_path(&artifact.source)?;
        sanitize_path(artifact.resolved_destination())?;
    }

    let mut seen = HashSet::new();
    for dep in &formula.dependencies {
        if dep.name.is_empty() {
            return Err(Error::InvalidFormula("Dependency name cannot be empty".to_string()));
        }
        if !seen.insert(dep.name.as_str()) {
            warnings.push(format!("Dependency {} is declared more than once", dep.name));
        }
    }

    if formula.package.version.is_none() {
        warnings.push("Missing package version".to_string());
    }
    if formula.package.description.is_none() {
        warnings.push("Missing package description".to_string());
    }
    if formula.package.license.is_none() {
        warnings.push("Missing package license".to_string());
    }
    match &formula.test {
        None => warnings.push("No test procedure; install will not be verified".to_string()),
        Some(test) if test.steps.iter().any(|s| s.is_empty()) => {
            return Err(Error::InvalidFormula("Empty command in test procedure".to_string()));
        }
        Some(_) => {}
    }
    if formula.source.revision.is_some() && formula.locator(Channel::Head).is_none() {
        warnings.push("Revision is set but there is no head channel".to_string());
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO_SUM: &str =
        "sha256:0000000000000000000000000000000000000000000000000000000000000000";

    fn formula_with(body: &str) -> String {
        format!(
            r#"
[package]
name = "pkg"
version = "1.0"
description = "A test package"
license = "MIT"
{}
"#,
            body
        )
    }

    #[test]
    fn test_parse_valid_formula() {
        let content = formula_with(
            r#"
[source]
stable = "/srv/src/pkg"

[install]
steps = [["make"]]
artifacts = [{ source = "out/pkg", destination = "bin/pkg" }]

[test]
steps = [["pkg", "--version"]]
"#,
        );

        let formula = parse_formula(&content).unwrap();
        assert_eq!(formula.package.name, "pkg");
        assert!(validate_formula(&formula).unwrap().is_empty());
    }

    #[test]
    fn test_parse_invalid_formula() {
        assert!(parse_formula("this is not valid toml at all {}").is_err());
        // Missing install section
        assert!(parse_formula("[package]\nname = \"x\"\n[source]\nstable = \"/x\"\n").is_err());
    }

    #[test]
    fn test_validate_empty_name() {
        let content = r#"
[package]
name = ""

[source]
stable = "/srv/src/pkg"

[install]
artifacts = [{ source = "pkg", destination = "bin/pkg" }]
"#;
        let formula = parse_formula(content).unwrap();
        assert!(validate_formula(&formula).is_err());
    }

    #[test]
    fn test_validate_requires_source_channel() {
        let content = formula_with(
            r#"
[source]

[install]
artifacts = [{ source = "pkg", destination = "bin/pkg" }]
"#,
        );
        let formula = parse_formula(&content).unwrap();
        let err = validate_formula(&formula).unwrap_err();
        assert!(err.to_string().contains("source channel"));
    }

    #[test]
    fn test_validate_requires_install_output() {
        let content = formula_with(
            r#"
[source]
stable = "/srv/src/pkg"

[install]
steps = [["make"]]
"#,
        );
        let formula = parse_formula(&content).unwrap();
        assert!(validate_formula(&formula).is_err());
    }

    #[test]
    fn test_validate_bad_checksum() {
        let content = formula_with(
            r#"
[source]
stable = "https://example.com/pkg-1.0.tar.gz"
checksum = "md5:abc123"

[install]
artifacts = [{ source = "pkg", destination = "bin/pkg" }]
"#,
        );
        let formula = parse_formula(&content).unwrap();
        assert!(validate_formula(&formula).is_err());
    }

    #[test]
    fn test_validate_rejects_traversal() {
        let content = formula_with(
            r#"
[source]
stable = "/srv/src/pkg"

[install]
artifacts = [{ source = "pkg", destination = "../../etc/pkg" }]
"#,
        );
        let formula = parse_formula(&content).unwrap();
        assert!(matches!(
            validate_formula(&formula),
            Err(Error::PathTraversal(_))
        ));
    }

    #[test]
    fn test_validate_warnings() {
        let content = format!(
            r#"
[package]
name = "pkg"

[source]
stable = "https://example.com/pkg.tar.gz"
checksum = "{}"

[[dependencies]]
name = "make"
stage = "build"

[[dependencies]]
name = "make"
stage = "build"

[install]
artifacts = [{{ source = "pkg", destination = "bin/pkg" }}]
"#,
            ZERO_SUM
        );

        let formula = parse_formula(&content).unwrap();
        let warnings = validate_formula(&formula).unwrap();
        assert!(warnings.iter().any(|w| w.contains("version")));
        assert!(warnings.iter().any(|w| w.contains("description")));
        assert!(warnings.iter().any(|w| w.contains("license")));
        assert!(warnings.iter().any(|w| w.contains("build steps")));
        assert!(warnings.iter().any(|w| w.contains("test procedure")));
        assert!(warnings.iter().any(|w| w.contains("more than once")));
    }

    #[test]
    fn test_validate_warns_on_unfetchable_locator() {
        let content = formula_with(
            r#"
[source]
stable = "ftp://example.com/pkg.zip"

[install]
steps = [["make"]]
artifacts = [{ source = "pkg", destination = "bin/pkg" }]

[test]
steps = [["pkg"]]
"#,
        );
        let formula = parse_formula(&content).unwrap();
        let warnings = validate_formula(&formula).unwrap();
        assert!(warnings.iter().any(|w| w.contains("stable source will fail")));
    }
}
