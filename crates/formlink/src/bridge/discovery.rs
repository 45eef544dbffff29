use super::probe::EndpointProbe;
use super::{Endpoint, ProcessTarget};
use crate::errors::{AutomationError, Result};
use crate::platforms::{ListenerSource, ListeningSocket};
use futures::stream::{self, StreamExt};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bounds of one discovery run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub port_range: RangeInclusive<u16>,
    /// Probe only this port and skip the socket table.
    pub fixed_port: Option<u16>,
    pub per_probe_timeout: Duration,
    pub overall_timeout: Duration,
    pub max_concurrency: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            port_range: 1024..=65535,
            fixed_port: None,
            per_probe_timeout: Duration::from_millis(500),
            overall_timeout: Duration::from_secs(5),
            max_concurrency: 16,
        }
    }
}

/// Finds the bridge among the ports the target process listens on.
pub struct EndpointDiscovery {
    listeners: Arc<dyn ListenerSource>,
    probe: EndpointProbe,
    options: DiscoveryOptions,
}

impl EndpointDiscovery {
    pub fn new(listeners: Arc<dyn ListenerSource>, probe: EndpointProbe, options: DiscoveryOptions) -> Self {
        Self {
            listeners,
            probe,
            options,
        }
    }

    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    /// Candidate ports for `target`, de-duplicated and ascending, each with the
    /// PID that owns it.
    pub async fn candidates(&self, target: &ProcessTarget) -> Result<Vec<(u16, Option<u32>)>> {
        if let Some(port) = self.options.fixed_port {
            return Ok(vec![(port, target.as_pid())]);
        }

        let pids = target.resolve_pids();
        if let (ProcessTarget::Name(name), Some(pids)) = (target, &pids) {
            if pids.is_empty() {
                return Err(AutomationError::DiscoveryFailure {
                    pid: None,
                    candidates: 0,
                    reason: format!("no running process matches '{name}'"),
                });
            }
        }

        let sockets = self.listeners.listening_sockets().await?;
        let mut candidates: Vec<(u16, Option<u32>)> = sockets
            .into_iter()
            .filter(|s| is_local(s))
            .filter(|s| self.options.port_range.contains(&s.port))
            .filter(|s| pids.as_ref().map(|p| p.contains(&s.pid)).unwrap_or(true))
            .map(|s| (s.port, Some(s.pid)))
            .collect();
        candidates.sort_by_key(|(port, _)| *port);
        candidates.dedup_by_key(|(port, _)| *port);
        Ok(candidates)
    }

    /// First candidate to pass the signature probe, within the overall timeout.
    #[tracing::instrument(skip(self, cancel), fields(target = %target))]
    pub async fn discover(
        &self,
        target: &ProcessTarget,
        cancel: Option<&CancellationToken>,
    ) -> Result<Endpoint> {
        let pid = target.as_pid();
        let candidates = self.candidates(target).await?;
        if candidates.is_empty() {
            return Err(AutomationError::DiscoveryFailure {
                pid,
                candidates: 0,
                reason: "no listening loopback ports in range".to_string(),
            });
        }
        tracing::debug!(count = candidates.len(), "probing candidate ports");

        let count = candidates.len();
        let race = self.probe_all(candidates);
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancelled => Err(AutomationError::Cancelled),
            outcome = tokio::time::timeout(self.options.overall_timeout, race) => match outcome {
                Ok(Some(endpoint)) => {
                    tracing::info!(port = endpoint.port, pid = ?endpoint.process_id, "bridge endpoint discovered");
                    Ok(endpoint)
                }
                Ok(None) => Err(AutomationError::DiscoveryFailure {
                    pid,
                    candidates: count,
                    reason: "no candidate answered the bridge signature".to_string(),
                }),
                Err(_) => Err(AutomationError::DiscoveryFailure {
                    pid,
                    candidates: count,
                    reason: format!(
                        "timed out after {}ms",
                        self.options.overall_timeout.as_millis()
                    ),
                }),
            },
        }
    }

    // Dropping the stream on the first hit abandons the probes still in flight.
    async fn probe_all(&self, candidates: Vec<(u16, Option<u32>)>) -> Option<Endpoint> {
        let limit = self.options.max_concurrency.max(1);
        let mut probes = stream::iter(candidates)
            .map(|(port, pid)| self.probe.probe(port, pid))
            .buffer_unordered(limit);
        while let Some(result) = probes.next().await {
            if result.is_some() {
                return result;
            }
        }
        None
    }
}

fn is_local(socket: &ListeningSocket) -> bool {
    socket.address.is_loopback() || socket.address.is_unspecified()
}
