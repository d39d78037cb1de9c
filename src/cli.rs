use crate::reporting::ReportView;
use crate::types::IssueStatus;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mch")]
#[command(about = "Repeatable network misconfiguration scanner")]
#[command(long_about = r#"
MCH scans hosts for open ports, exposed files and directories, and weak
Access-Control-Allow-Origin handling. Findings are stored per target so
that repeated runs only report what changed.

WARNING: Only scan hosts you own or have explicit permission to test.

Usage Examples:
  mch scan all example.com                        # Every scanner
  mch scan ports,acao 10.0.0.5 --override ports.range=1-1024
  mch scan fuzz --host-list hosts.txt --override fuzz.wordlist=words.txt
  mch report example.com --type all               # Everything stored
  mch ack example.com --port 8080                 # Accept an open port
  mch ack example.com --issue 2 --as false_positive
"#)]
#[command(version)]
#[command(author)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (defaults to the platform config dir)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Configuration overrides, e.g. ports.range=1-1024 (repeatable)
    #[arg(long = "override", value_name = "SECTION.KEY=VALUE", global = true)]
    pub overrides: Vec<String>,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan hosts for misconfigurations
    Scan {
        /// Comma separated scan types (ports, fuzz, acao) or 'all'
        #[arg(default_value = "all")]
        types: String,

        /// Hosts to scan
        hosts: Vec<String>,

        /// File with hosts, one per line
        #[arg(long, value_name = "FILE")]
        host_list: Option<PathBuf>,
    },

    /// Show stored findings
    Report {
        /// Hosts to report
        #[arg(required = true)]
        hosts: Vec<String>,

        /// Which findings to show
        #[arg(long = "type", value_enum, default_value = "warnings")]
        view: ReportView,

        /// Print the report as JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Also write the JSON report to this file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Acknowledge a finding
    Ack(AckArgs),

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
#[command(group(clap::ArgGroup::new("finding").required(true).args(["port", "fuzz", "issue"])))]
pub struct AckArgs {
    /// Host the finding belongs to
    pub host: String,

    /// Open port to acknowledge
    #[arg(long)]
    pub port: Option<u16>,

    /// Exposed URL to triage
    #[arg(long, value_name = "URL", requires = "status")]
    pub fuzz: Option<String>,

    /// Index of an ACAO issue, as shown by `mch report --type all`
    #[arg(long, value_name = "INDEX", requires = "status")]
    pub issue: Option<usize>,

    /// New status: will_fix, false_positive or wont_fix
    #[arg(long = "as", value_name = "STATUS", value_parser = parse_status)]
    pub status: Option<IssueStatus>,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

fn parse_status(value: &str) -> std::result::Result<IssueStatus, String> {
    value.parse::<IssueStatus>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_scan_arguments() {
        let cli = Cli::parse_from([
            "mch",
            "scan",
            "ports,acao",
            "example.com",
            "10.0.0.1",
            "--override",
            "ports.range=1-1024",
            "-vv",
        ]);

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.overrides, vec!["ports.range=1-1024"]);
        match cli.command {
            Commands::Scan { types, hosts, host_list } => {
                assert_eq!(types, "ports,acao");
                assert_eq!(hosts, vec!["example.com", "10.0.0.1"]);
                assert!(host_list.is_none());
            }
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn test_ack_requires_status_for_issues() {
        assert!(Cli::try_parse_from(["mch", "ack", "h", "--issue", "1"]).is_err());
        assert!(Cli::try_parse_from(["mch", "ack", "h"]).is_err());

        let cli = Cli::try_parse_from(["mch", "ack", "h", "--issue", "1", "--as", "wont-fix"]).unwrap();
        match cli.command {
            Commands::Ack(args) => {
                assert_eq!(args.issue, Some(1));
                assert_eq!(args.status, Some(IssueStatus::WontFix));
            }
            _ => panic!("expected ack"),
        }
    }
}
