//! Best-effort recovery of rules from a deployed gateway configuration
//!
//! Used when the durable snapshot is missing, empty or unreadable. The parser
//! is a per-line state machine over the block shape the renderer emits:
//!
//! ```text
//! handle @<hostname> {           Idle -> InBlock
//!     reverse_proxy <upstream>   InBlock -> HaveTarget
//! }                              HaveTarget -> Idle (emit rule)
//! ```
//!
//! Anything that does not fit is skipped with a reason; parsing never fails.

use chrono::Utc;

use crate::gateway::rule::{Protocol, ProxyRule};

/// A block that could not be turned into a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedBlock {
    /// Line number of the block-open line (1-based)
    pub line: usize,
    /// Hostname named by the block
    pub hostname: String,
    pub reason: String,
}

/// Result of parsing a deployed configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedConfig {
    pub rules: Vec<ProxyRule>,
    pub skipped: Vec<SkippedBlock>,
}

#[derive(Debug)]
enum State {
    Idle,
    InBlock {
        line: usize,
        hostname: String,
    },
    HaveTarget {
        line: usize,
        hostname: String,
        target: Result<(String, u16, Protocol), String>,
    },
}

/// Parse the rules out of deployed configuration text
pub fn parse_deployed_config(content: &str) -> ParsedConfig {
    let mut parsed = ParsedConfig::default();
    let mut state = State::Idle;

    for (index, raw) in content.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();

        if let Some(hostname) = block_open(line) {
            match std::mem::replace(&mut state, State::Idle) {
                State::Idle => {}
                State::InBlock { line, hostname: open }
                | State::HaveTarget { line, hostname: open, .. } => {
                    parsed.skip(line, open, format!("interrupted by block at line {}", line_no));
                }
            }
            state = State::InBlock {
                line: line_no,
                hostname,
            };
            continue;
        }

        state = match state {
            State::Idle => State::Idle,

            State::InBlock { line: open, hostname } => {
                if let Some(upstream) = forwarding_target(line) {
                    State::HaveTarget {
                        line: open,
                        hostname,
                        target: parse_upstream(upstream),
                    }
                } else if line == "}" {
                    parsed.skip(open, hostname, "block has no reverse_proxy line".to_string());
                    State::Idle
                } else {
                    State::InBlock { line: open, hostname }
                }
            }

            State::HaveTarget { line: open, hostname, target } => {
                if line == "}" {
                    parsed.finish(open, hostname, target);
                    State::Idle
                } else {
                    State::HaveTarget { line: open, hostname, target }
                }
            }
        };
    }

    match state {
        State::Idle => {}
        State::InBlock { line, hostname } | State::HaveTarget { line, hostname, .. } => {
            parsed.skip(line, hostname, "block is never closed".to_string());
        }
    }

    parsed
}

impl ParsedConfig {
    fn skip(&mut self, line: usize, hostname: String, reason: String) {
        tracing::warn!("Skipping deployed block for {} (line {}): {}", hostname, line, reason);
        self.skipped.push(SkippedBlock { line, hostname, reason });
    }

    fn finish(
        &mut self,
        line: usize,
        hostname: String,
        target: Result<(String, u16, Protocol), String>,
    ) {
        let (ip, port, protocol) = match target {
            Ok(target) => target,
            Err(reason) => return self.skip(line, hostname, reason),
        };

        let rule = ProxyRule {
            hostname: hostname.clone(),
            target_ip: ip,
            target_port: port,
            protocol,
            enabled: true,
            created_at: Utc::now(),
        };

        match rule.validate() {
            Ok(()) => self.rules.push(rule),
            Err(e) => self.skip(line, hostname, e.to_string()),
        }
    }
}

/// `handle @<hostname> {`
fn block_open(line: &str) -> Option<String> {
    let rest = line.strip_prefix("handle")?;
    let rest = rest.trim_start().strip_prefix('@')?;
    let hostname = rest.strip_suffix('{')?.trim();

    if hostname.is_empty() || hostname.contains(char::is_whitespace) {
        return None;
    }
    Some(hostname.to_string())
}

/// `reverse_proxy <upstream>`
fn forwarding_target(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("reverse_proxy")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim())
}

fn parse_upstream(upstream: &str) -> Result<(String, u16, Protocol), String> {
    let (protocol, address) = if let Some(rest) = upstream.strip_prefix("https://") {
        (Protocol::Https, rest)
    } else if let Some(rest) = upstream.strip_prefix("http://") {
        (Protocol::Http, rest)
    } else {
        (Protocol::Http, upstream)
    };

    let (ip, port) = address
        .rsplit_once(':')
        .ok_or_else(|| format!("upstream '{}' has no port", upstream))?;

    let port: u16 = port
        .parse()
        .map_err(|_| format!("upstream '{}' has an invalid port", upstream))?;

    let ip = ip.trim_start_matches('[').trim_end_matches(']');
    if ip.is_empty() || port == 0 {
        return Err(format!("upstream '{}' is incomplete", upstream));
    }

    Ok((ip.to_string(), port, protocol))
}
