//! Listening-socket table from the OS command line tools.
//!
//! Windows: `netstat -ano -p TCP` (and `TCPv6`). Elsewhere: `lsof -F pn`.

use super::{ListenerSource, ListeningSocket};
use crate::errors::{AutomationError, Result};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::process::Command;

/// Reads listeners by shelling out to the platform tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemListeners;

#[async_trait]
impl ListenerSource for SystemListeners {
    #[cfg(target_os = "windows")]
    async fn listening_sockets(&self) -> Result<Vec<ListeningSocket>> {
        let mut sockets = Vec::new();
        for proto in ["TCP", "TCPv6"] {
            let stdout = run("netstat", &["-ano", "-p", proto]).await?;
            sockets.extend(parse_netstat(&stdout));
        }
        Ok(sockets)
    }

    #[cfg(not(target_os = "windows"))]
    async fn listening_sockets(&self) -> Result<Vec<ListeningSocket>> {
        let stdout = run("lsof", &["-nP", "-iTCP", "-sTCP:LISTEN", "-F", "pn"]).await?;
        Ok(parse_lsof(&stdout))
    }
}

async fn run(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| AutomationError::PlatformError(format!("failed to run {program}: {e}")))?;
    // lsof exits 1 when nothing matches
    if !output.status.success() && output.stdout.is_empty() {
        tracing::debug!(program, status = ?output.status, "listener command returned no rows");
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parses lines like `  TCP    127.0.0.1:17373   0.0.0.0:0   LISTENING   6728`.
///
/// The state column is localized on non-English Windows, so a foreign port of `0`
/// also marks a listener.
pub fn parse_netstat(output: &str) -> Vec<ListeningSocket> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 5 || !parts[0].eq_ignore_ascii_case("tcp") && !parts[0].eq_ignore_ascii_case("tcpv6") {
                return None;
            }
            let listening = parts[3].eq_ignore_ascii_case("LISTENING") || parts[2].ends_with(":0");
            if !listening {
                return None;
            }
            let (address, port) = split_host_port(parts[1])?;
            let pid = parts.last()?.parse::<u32>().ok()?;
            Some(ListeningSocket { address, port, pid })
        })
        .collect()
}

/// Parses `lsof -F pn` field output: `p<pid>` starts a process, `n<addr>:<port>` names a socket.
pub fn parse_lsof(output: &str) -> Vec<ListeningSocket> {
    let mut sockets = Vec::new();
    let mut pid = None;
    for line in output.lines() {
        let (tag, rest) = match line.chars().next() {
            Some(tag) => (tag, &line[tag.len_utf8()..]),
            None => continue,
        };
        match tag {
            'p' => pid = rest.trim().parse::<u32>().ok(),
            'n' => {
                let (Some(pid), Some((address, port))) = (pid, split_host_port(rest.trim())) else {
                    continue;
                };
                sockets.push(ListeningSocket { address, port, pid });
            }
            _ => {}
        }
    }
    sockets
}

fn split_host_port(endpoint: &str) -> Option<(IpAddr, u16)> {
    // lsof may append "(LISTEN)" when not in field mode
    let endpoint = endpoint.split_whitespace().next()?;
    let (host, port) = endpoint.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = host.split('%').next().unwrap_or(host);
    let address = match host {
        "*" => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        "::" => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        other => other.parse::<IpAddr>().ok()?,
    };
    Some((address, port))
}
