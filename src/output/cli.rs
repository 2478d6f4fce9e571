use crate::issues::{build_issues_tree, FileNode};
use crate::model::{to_date, ScanResults, Severity};
use anyhow::Result;
use std::collections::BTreeMap;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct FileRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Issues")]
    issues: usize,
    #[tabled(rename = "Last Scan")]
    last_scan: String,
}

#[derive(Tabled)]
struct DependencyRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "Issues")]
    issues: String,
    #[tabled(rename = "Fixed In")]
    fixed_in: String,
}

pub fn print_cli_table(results: &ScanResults) -> Result<()> {
    println!();
    println!("Workspace: {}", results.path);
    println!("Oldest scan: {}", to_date(results.oldest_scan_timestamp()));
    println!();

    if !results.has_information() {
        println!("No issues found.");
        return Ok(());
    }

    let tree = build_issues_tree(results);
    let rows: Vec<FileRow> = tree
        .iter()
        .map(|node| FileRow {
            severity: match node {
                FileNode::Failed { .. } => "FAILED".to_string(),
                _ => format_severity(node.severity()),
            },
            file: truncate(&node.label(), 60),
            issues: node.issue_count(),
            last_scan: to_date(node.timestamp()),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));

    for node in &tree {
        let FileNode::Descriptor(descriptor) = node else {
            continue;
        };
        if descriptor.dependencies_with_issues.is_empty() {
            continue;
        }
        println!();
        println!(
            "{} ({}):",
            node.description(&results.path),
            descriptor.package_type
        );
        println!();

        let rows: Vec<DependencyRow> = descriptor
            .dependencies_with_issues
            .iter()
            .map(|d| DependencyRow {
                severity: format_severity(d.severity),
                component: truncate(&d.component_id, 50),
                issues: truncate(
                    &d.issues
                        .iter()
                        .map(|i| i.issue_id.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                    40,
                ),
                fixed_in: if d.fixed_versions.is_empty() {
                    "-".to_string()
                } else {
                    d.fixed_versions.join(", ")
                },
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    println!();
    print_summary(&tree);
    Ok(())
}

fn print_summary(tree: &[FileNode]) {
    let mut by_severity: BTreeMap<Severity, usize> = BTreeMap::new();
    let mut failed = 0;
    for node in tree {
        match node {
            FileNode::Descriptor(descriptor) => {
                for issue in descriptor
                    .dependencies_with_issues
                    .iter()
                    .flat_map(|d| d.issues.iter())
                {
                    *by_severity.entry(issue.severity).or_default() += 1;
                }
            }
            FileNode::Code(code) => {
                for (_, finding) in &code.findings {
                    *by_severity.entry(finding.severity).or_default() += 1;
                }
            }
            FileNode::Failed { .. } => failed += 1,
        }
    }

    let counts: Vec<String> = by_severity
        .iter()
        .rev()
        .map(|(severity, count)| format!("{} {}", count, severity))
        .collect();
    if counts.is_empty() {
        println!("Summary: no issues");
    } else {
        println!("Summary: {}", counts.join(", "));
    }
    if failed > 0 {
        println!("{} file(s) failed to scan", failed);
    }
}

fn format_severity(severity: Severity) -> String {
    match severity {
        Severity::Critical => "\x1b[31mCRITICAL\x1b[0m".to_string(),
        Severity::High => "\x1b[91mHIGH\x1b[0m".to_string(),
        Severity::Medium => "\x1b[33mMEDIUM\x1b[0m".to_string(),
        Severity::Low => "\x1b[32mLOW\x1b[0m".to_string(),
        other => other.as_str().to_uppercase(),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("npm://very-long-name:1.0.0", 10), "npm://v...");
        assert_eq!(truncate("ééééé", 4), "é...");
    }

    #[test]
    fn test_format_severity() {
        assert!(format_severity(Severity::Critical).contains("CRITICAL"));
        assert_eq!(format_severity(Severity::Unknown), "UNKNOWN");
        assert_eq!(
            format_severity(Severity::NotApplicableHigh),
            "HIGH (NOT APPLICABLE)"
        );
    }
}
