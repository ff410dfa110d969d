use colored::Colorize;
use converge::ApplyReport;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Run Report
// ============================================================================

/// Print what a converge run changed, skipped and failed
pub fn print_report(report: &ApplyReport, quiet: bool) {
    if !quiet && !report.changes.is_empty() {
        section("Changed");
        for change in &report.changes {
            dim(&format!("{}: {}", change.config, change.unit));
        }
    }

    if !quiet && !report.skipped.is_empty() {
        section("Skipped by test");
        for skip in &report.skipped {
            dim(&format!("{}: {}", skip.config, skip.unit));
        }
    }

    if !report.ignored.is_empty() {
        section("Ignored errors");
        for failure in &report.ignored {
            warn(&format!("{}: {} ({})", failure.config, failure.unit, failure.error));
        }
    }

    if !report.failures.is_empty() {
        section("Failures");
        for failure in &report.failures {
            error(&format!("{}: {} ({})", failure.config, failure.unit, failure.error));
        }
    }

    println!();
    let line = summary(report);
    if report.is_success() {
        success(&line);
    } else {
        warn(&line);
    }
}

/// One-line outcome of a run
pub fn summary(report: &ApplyReport) -> String {
    let mut line = format!(
        "{} {} applied, {} {}",
        report.steps_applied,
        plural(report.steps_applied, "config", "configs"),
        report.total_changes(),
        plural(report.total_changes(), "change", "changes"),
    );
    if report.steps_skipped > 0 {
        line.push_str(&format!(", {} already done", report.steps_skipped));
    }
    if !report.failures.is_empty() {
        line.push_str(&format!(
            ", {} {}",
            report.failures.len(),
            plural(report.failures.len(), "failure", "failures")
        ));
    }
    if report.cancelled {
        line.push_str(" (cancelled)");
    }
    line
}

fn plural<'a>(count: usize, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 { one } else { many }
}

// ============================================================================
// Tests
// ============================================================================
