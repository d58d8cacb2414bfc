//! Test: Matrix expansion - products, exclusions and stable identifiers

use crate::helpers::*;
use buildmatrix::core::config::MatrixConfig;
use buildmatrix::core::{AxisPattern, AxisSet, Configuration};
use buildmatrix::matrix::{MatrixError, MatrixExpander};
use std::collections::HashSet;

#[test]
fn test_four_configurations_without_exclusions() {
    let (_, jobs) = plan(OS_RUNTIME);

    let planned: Vec<String> = jobs.iter().map(|job| job.id()).collect();
    assert_eq!(
        planned,
        vec![
            "os=linux,runtime=3.6",
            "os=linux,runtime=3.7",
            "os=osx,runtime=3.6",
            "os=osx,runtime=3.7",
        ]
    );
    assert_eq!(jobs[2].environment.as_str(), "image:osx");
    assert_eq!(jobs[1].steps[0].command, "build --runtime 3.7");
    assert_eq!(jobs[1].steps[1].command, "test --os linux");
}

#[test]
fn test_exclusion_leaves_three_configurations() {
    let yaml = format!("{}exclude:\n  - {{ os: osx, runtime: \"3.6\" }}\n", OS_RUNTIME);
    let (_, jobs) = plan(&yaml);

    let planned: Vec<String> = jobs.iter().map(|job| job.id()).collect();
    assert_eq!(
        planned,
        vec!["os=linux,runtime=3.6", "os=linux,runtime=3.7", "os=osx,runtime=3.7"]
    );
    let indices: Vec<usize> = jobs.iter().map(|job| job.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[test]
fn test_identifiers_ignore_declaration_order() {
    let forward = AxisSet::new()
        .with_axis("os", ["linux", "osx", "win"])
        .with_axis("runtime", ["3.6", "3.7"])
        .with_axis("blas", ["mkl", "openblas"]);
    let backward = AxisSet::new()
        .with_axis("blas", ["mkl", "openblas"])
        .with_axis("runtime", ["3.6", "3.7"])
        .with_axis("os", ["linux", "osx", "win"]);

    let expander = MatrixExpander::new();
    let a = expander.expand(&forward, &[]).unwrap();
    let b = expander.expand(&backward, &[]).unwrap();

    assert_eq!(a.len(), expander.count(&forward));
    assert_eq!(a.len(), 12);

    let ids_a: Vec<String> = a.iter().map(Configuration::id).collect();
    let ids_b: Vec<String> = b.iter().map(Configuration::id).collect();
    assert_eq!(ids_a, ids_b);

    let unique: HashSet<&String> = ids_a.iter().collect();
    assert_eq!(unique.len(), ids_a.len());

    for id in &ids_a {
        assert_eq!(&Configuration::from_id(id).unwrap().id(), id);
    }
}

#[test]
fn test_excluding_everything_is_an_error() {
    let axes = AxisSet::new().with_axis("os", ["linux"]);
    let result = MatrixExpander::new().expand(&axes, &[AxisPattern::new().with("os", "linux")]);
    assert_eq!(result, Err(MatrixError::AllConfigurationsExcluded(1)));
}

#[test]
fn test_invalid_matrix_rejected_before_any_job() {
    let yaml = r#"
name: empty-axis
axes:
  os: []
environments:
  default: ubuntu
steps:
  - name: build
    run: make
"#;
    assert!(MatrixConfig::from_yaml(yaml).is_err());
}

#[test]
fn test_allow_failures_marked_at_plan_time() {
    let yaml = format!("{}allow_failures:\n  - {{ runtime: \"3.7\" }}\n", OS_RUNTIME);
    let (_, jobs) = plan(&yaml);

    let allowed: Vec<String> = jobs
        .iter()
        .filter(|job| job.allow_failure)
        .map(|job| job.id())
        .collect();
    assert_eq!(allowed, vec!["os=linux,runtime=3.7", "os=osx,runtime=3.7"]);
}
