use crate::reporting::{IndexedIssue, ReportView, TargetStatusReport};
use crate::scanner::{ScanSummary, TargetReport};
use crate::types::IssueStatus;
use colored::*;

/// Colored terminal output for scan results and reports
pub struct DisplayManager {
    use_colors: bool,
    quiet_mode: bool,
}

impl DisplayManager {
    pub fn new() -> Self {
        Self::with_quiet(false)
    }

    pub fn with_quiet(quiet: bool) -> Self {
        let use_colors = std::env::var("NO_COLOR").is_err()
            && std::env::var("TERM").map_or(true, |term| term != "dumb");

        Self {
            use_colors,
            quiet_mode: quiet,
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet_mode
    }

    pub fn print_banner(&self, title: &str, subtitle: Option<&str>) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!();
            println!("  {}", "┌─".bright_cyan().to_string() + &"─".repeat(title.len() + 2) + "─┐");
            println!("  {} {} {}", "│".bright_cyan(), title.bright_white().bold(), "│".bright_cyan());
            if let Some(sub) = subtitle {
                println!(
                    "  {} {} {}",
                    "│".bright_cyan(),
                    format!("{:^width$}", sub, width = title.len()).bright_black(),
                    "│".bright_cyan()
                );
            }
            println!("  {}", "└─".bright_cyan().to_string() + &"─".repeat(title.len() + 2) + "─┘");
            println!();
        } else {
            let border = "=".repeat(title.len() + 4);
            println!("\n{}", border);
            println!("  {}  ", title);
            if let Some(sub) = subtitle {
                println!("  {}  ", sub);
            }
            println!("{}\n", border);
        }
    }

    pub fn print_section_header(&self, title: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("{}", title.bright_cyan().bold());
            println!("{}", "─".repeat(title.chars().count()).bright_cyan());
        } else {
            println!("{}", title);
            println!("{}", "=".repeat(title.len()));
        }
    }

    pub fn print_success(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("  {} {}", "✓".bright_green().bold(), message.green());
        } else {
            println!("[✓] {}", message);
        }
    }

    pub fn print_warning(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("  {} {}", "!".bright_yellow().bold(), message.yellow());
        } else {
            println!("[!] {}", message);
        }
    }

    /// Errors are printed even in quiet mode
    pub fn print_error(&self, message: &str) {
        if self.use_colors {
            eprintln!("  {} {}", "✗".bright_red().bold(), message.red().bold());
        } else {
            eprintln!("[✗] {}", message);
        }
    }

    pub fn print_info(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("  {} {}", "i".bright_blue().bold(), message.blue());
        } else {
            println!("[i] {}", message);
        }
    }

    /// Per-scanner outcome of one target, followed by a warnings/errors line.
    pub fn print_target_report(&self, report: &TargetReport) {
        if self.quiet_mode {
            return;
        }

        let target = report.target.to_string();
        for outcome in &report.outcomes {
            match &outcome.result {
                Ok(ScanSummary::Ports { current_open, new_ports }) => {
                    self.print_port_results(&target, current_open, new_ports);
                }
                Ok(ScanSummary::Fuzz { found, added }) => self.print_fuzz_results(&target, found, added.len()),
                Ok(ScanSummary::Acao {
                    open,
                    new,
                    regressions,
                    resolved,
                }) => {
                    if open.is_empty() {
                        self.print_line("•", &target, "No open ACAO issues", false);
                    } else {
                        self.print_line("•", &target, &format!("{} open ACAO issues ({} new)", open.len(), new), true);
                        for issue in open {
                            self.print_item(&format!("{} {} → {}", issue.category, issue.url(), issue.detail));
                        }
                    }
                    if *regressions > 0 {
                        self.print_warning(&format!("{} closed ACAO issues were detected again on {}", regressions, target));
                    }
                    if *resolved > 0 {
                        self.print_info(&format!("{} ACAO issues no longer detected on {}", resolved, target));
                    }
                }
                Err(e) => self.print_error(&format!("{} failed on {}: {}", outcome.kind, target, e)),
            }
        }

        let warnings = report.warnings();
        let errors = report.errors().len();
        if self.use_colors {
            println!(
                "  {} {} [{}/{}]",
                "→".bright_black(),
                target.bright_white().bold(),
                warnings.to_string().yellow().bold(),
                errors.to_string().red().bold()
            );
        } else {
            println!("  → {} [{} warnings/{} errors]", target, warnings, errors);
        }
        println!();
    }

    pub fn print_port_results(&self, target: &str, current_open: &[u16], new_ports: &[u16]) {
        if self.quiet_mode {
            return;
        }

        if new_ports.is_empty() {
            self.print_line("•", target, &format!("No new open ports ({} open)", current_open.len()), false);
            return;
        }

        self.print_line("•", target, &format!("{} new open ports", new_ports.len()), true);
        for port in new_ports {
            self.print_item(&port.to_string());
        }
    }

    pub fn print_fuzz_results(&self, target: &str, found: &[String], added: usize) {
        if self.quiet_mode {
            return;
        }

        if found.is_empty() {
            self.print_line("•", target, "No exposed files/dirs", false);
            return;
        }

        self.print_line("•", target, &format!("{} exposed files/dirs ({} new)", found.len(), added), true);
        for url in found.iter().take(10) {
            self.print_item(url);
        }
        if found.len() > 10 {
            self.print_item(&format!("... {} more", found.len() - 10));
        }
    }

    pub fn print_scan_summary(&self, hosts: usize, warnings: usize, errors: usize) {
        if self.quiet_mode {
            return;
        }

        self.print_section_header("SCAN SUMMARY");
        if self.use_colors {
            println!("  {}: {}", "Hosts Scanned".bright_white().bold(), hosts.to_string().cyan().bold());
            println!("  {}: {}", "Warnings".bright_white().bold(), warnings.to_string().yellow().bold());
            println!("  {}: {}", "Errors".bright_white().bold(), errors.to_string().red().bold());
        } else {
            println!("Hosts Scanned: {}", hosts);
            println!("Warnings: {}", warnings);
            println!("Errors: {}", errors);
        }
        println!();
    }

    /// Render a stored document the way `mch report` shows it.
    pub fn print_status_report(&self, report: &TargetStatusReport) {
        let view = match report.view {
            ReportView::Critical => "critical",
            ReportView::Warnings => "warnings",
            ReportView::All => "all",
        };
        self.print_section_header(&format!("Report for {} ({})", report.target, view));

        if let Some(last_scan) = report.last_scan {
            self.print_info(&format!("Last scan: {}", last_scan.format("%Y-%m-%d %H:%M:%S UTC")));
        }

        if report.view != ReportView::Critical {
            self.print_row("Unacked Ports", &join_or_none(&report.unacknowledged_ports), !report.unacknowledged_ports.is_empty());
        }
        if report.view == ReportView::All {
            self.print_row("Open Ports", &join_or_none(&report.open_ports), false);
            self.print_row("Acked Ports", &join_or_none(&report.acknowledged_ports), false);
        }

        for (bucket, urls) in &report.fuzz {
            let label = format!("Fuzz {}", bucket);
            self.print_row(&label, &format!("{} URLs", urls.len()), bucket == "issues" && !urls.is_empty());
            for url in urls {
                self.print_item(url);
            }
        }

        if report.acao.is_empty() {
            self.print_row("ACAO Issues", "None", false);
        } else {
            self.print_row("ACAO Issues", &report.acao.len().to_string(), report.view != ReportView::All);
            for entry in &report.acao {
                self.print_issue(entry);
            }
        }
        println!();
    }

    fn print_issue(&self, entry: &IndexedIssue) {
        let issue = &entry.issue;
        let line = format!(
            "#{} [{}] {} {} → {}",
            entry.index,
            issue.status,
            issue.category,
            issue.url(),
            issue.detail
        );
        if self.use_colors {
            println!("    {}", line.color(status_color(issue.status)));
        } else {
            println!("    {}", line);
        }
    }

    fn print_row(&self, label: &str, value: &str, highlight: bool) {
        if self.use_colors {
            let value = if highlight { value.yellow().bold() } else { value.normal() };
            println!("  {:<20} {}", label.bright_white().bold(), value);
        } else {
            println!("  {:<20} {}", label, value);
        }
    }

    fn print_line(&self, bullet: &str, target: &str, message: &str, highlight: bool) {
        if self.use_colors {
            let bullet = if highlight { bullet.bright_yellow().bold() } else { bullet.bright_black() };
            let message = if highlight { message.yellow().bold() } else { message.bright_black() };
            println!("  {} {} - {}", bullet, target.cyan(), message);
        } else {
            println!("  {} {} - {}", bullet, target, message);
        }
    }

    fn print_item(&self, item: &str) {
        if self.use_colors {
            println!("    {} {}", "→".bright_green(), item.truncate_with_ellipsis(120).yellow());
        } else {
            println!("    → {}", item);
        }
    }
}

impl Default for DisplayManager {
    fn default() -> Self {
        Self::new()
    }
}

fn status_color(status: IssueStatus) -> Color {
    match status {
        IssueStatus::Uncategorized => Color::BrightRed,
        IssueStatus::WillFix => Color::Yellow,
        IssueStatus::WontFix => Color::Magenta,
        IssueStatus::FalsePositive | IssueStatus::Resolved | IssueStatus::Fixed => Color::Green,
    }
}

fn join_or_none(ports: &[u16]) -> String {
    if ports.is_empty() {
        return "None".to_string();
    }
    ports.iter().map(u16::to_string).collect::<Vec<_>>().join(", ")
}

trait StringExt {
    fn truncate_with_ellipsis(&self, max_len: usize) -> String;
}

impl StringExt for str {
    fn truncate_with_ellipsis(&self, max_len: usize) -> String {
        if self.chars().count() <= max_len {
            self.to_string()
        } else {
            let kept: String = self.chars().take(max_len.saturating_sub(3)).collect();
            format!("{}...", kept)
        }
    }
}
