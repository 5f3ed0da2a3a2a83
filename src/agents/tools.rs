//! Scanning tool capabilities
//!
//! Each tool knows how to turn a target into command-line arguments and how to
//! pull structured findings out of its stdout. Nothing here spawns processes.

use serde_json::{json, Value};

/// How to invoke one external tool and read its output
pub trait ToolCapability: Send + Sync {
    /// Logical agent name, used as the registry key
    fn name(&self) -> &str;

    /// Executable to spawn
    fn command(&self) -> &str;

    /// Arguments for scanning `target`
    fn build_arguments(&self, target: &str) -> Vec<String>;

    /// Structured view of the tool's stdout
    fn parse_output(&self, stdout: &str) -> Value;

    /// Prefix used when rendering extra options (`-` or `--`)
    fn option_prefix(&self) -> &'static str {
        "-"
    }
}

/// Render extra tool options as arguments
///
/// `true` emits a bare flag; `false` and `null` are skipped; anything else is
/// emitted as flag + value.
pub fn render_options(prefix: &str, options: &[(String, Value)]) -> Vec<String> {
    let mut args = Vec::new();
    for (key, value) in options {
        match value {
            Value::Bool(true) => args.push(format!("{}{}", prefix, key)),
            Value::Bool(false) | Value::Null => {}
            Value::String(s) => {
                args.push(format!("{}{}", prefix, key));
                args.push(s.clone());
            }
            other => {
                args.push(format!("{}{}", prefix, key));
                args.push(other.to_string());
            }
        }
    }
    args
}

fn matching_lines(stdout: &str, keep: impl Fn(&str) -> bool) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && keep(line))
        .map(str::to_string)
        .collect()
}

/// Port and service scanner
#[derive(Debug, Default)]
pub struct Nmap;

impl ToolCapability for Nmap {
    fn name(&self) -> &str {
        "nmap"
    }

    fn command(&self) -> &str {
        "nmap"
    }

    fn build_arguments(&self, target: &str) -> Vec<String> {
        vec!["-sV".to_string(), target.to_string()]
    }

    fn parse_output(&self, stdout: &str) -> Value {
        let open_ports = matching_lines(stdout, |line| {
            (line.contains("/tcp") || line.contains("/udp")) && line.contains(" open ")
        });
        json!({ "open_ports": open_ports })
    }
}

/// Web server scanner
#[derive(Debug, Default)]
pub struct Nikto;

impl ToolCapability for Nikto {
    fn name(&self) -> &str {
        "nikto"
    }

    fn command(&self) -> &str {
        "nikto"
    }

    fn build_arguments(&self, target: &str) -> Vec<String> {
        vec!["-h".to_string(), target.to_string()]
    }

    fn parse_output(&self, stdout: &str) -> Value {
        let findings = matching_lines(stdout, |line| line.starts_with("+ "));
        json!({ "findings": findings })
    }
}

/// SQL injection scanner
#[derive(Debug, Default)]
pub struct Sqlmap;

impl ToolCapability for Sqlmap {
    fn name(&self) -> &str {
        "sqlmap"
    }

    fn command(&self) -> &str {
        "sqlmap"
    }

    fn build_arguments(&self, target: &str) -> Vec<String> {
        vec!["-u".to_string(), target.to_string(), "--batch".to_string()]
    }

    fn parse_output(&self, stdout: &str) -> Value {
        let injectable = matching_lines(stdout, |line| {
            let lower = line.to_lowercase();
            lower.contains("injectable") || lower.contains("is vulnerable")
        });
        json!({ "injectable": injectable })
    }
}

/// Web content brute-forcer
#[derive(Debug, Default)]
pub struct Dirb;

impl ToolCapability for Dirb {
    fn name(&self) -> &str {
        "dirb"
    }

    fn command(&self) -> &str {
        "dirb"
    }

    fn build_arguments(&self, target: &str) -> Vec<String> {
        vec![target.to_string()]
    }

    fn parse_output(&self, stdout: &str) -> Value {
        let findings = matching_lines(stdout, |line| line.contains("==>") || line.contains("CODE:"));
        json!({ "findings": findings })
    }
}

/// WordPress scanner
#[derive(Debug, Default)]
pub struct WpScan;

impl ToolCapability for WpScan {
    fn name(&self) -> &str {
        "wpscan"
    }

    fn command(&self) -> &str {
        "wpscan"
    }

    fn build_arguments(&self, target: &str) -> Vec<String> {
        vec!["--url".to_string(), target.to_string()]
    }

    fn parse_output(&self, stdout: &str) -> Value {
        serde_json::from_str(stdout).unwrap_or_else(|_| json!({ "raw_output": stdout }))
    }

    fn option_prefix(&self) -> &'static str {
        "--"
    }
}

/// Subdomain enumerator
#[derive(Debug, Default)]
pub struct Sublist3r;

impl ToolCapability for Sublist3r {
    fn name(&self) -> &str {
        "sublist3r"
    }

    fn command(&self) -> &str {
        "sublist3r"
    }

    fn build_arguments(&self, target: &str) -> Vec<String> {
        vec![
            "-d".to_string(),
            target.to_string(),
            "-o".to_string(),
            "-".to_string(),
        ]
    }

    fn parse_output(&self, stdout: &str) -> Value {
        json!({ "subdomains": matching_lines(stdout, |_| true) })
    }
}

/// Every tool shipped with the registry
pub fn builtin_tools() -> Vec<Box<dyn ToolCapability>> {
    vec![
        Box::new(Nmap),
        Box::new(Nikto),
        Box::new(Sqlmap),
        Box::new(Dirb),
        Box::new(WpScan),
        Box::new(Sublist3r),
    ]
}
