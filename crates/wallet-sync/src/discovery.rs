//! Credential discovery: find which endpoint currently recognizes a credential.
//!
//! Candidates are the preferred endpoint, then locally known endpoints, then directory entries,
//! sanitized and deduplicated in that order. They are probed in fixed-size batches; each batch
//! runs fully in parallel and the scan stops at the first valid outcome in candidate order.
//! The directory is fetched while the first batch (preferred and known endpoints) is in flight,
//! with its wait capped at `probe_timeout`. A run over N candidates therefore takes at most
//! `ceil(N / batch_size) * probe_timeout` when the local endpoints fill the first batch, and one
//! extra batch window otherwise.

use crate::config::DiscoveryConfig;
use crate::directory::{Directory, HttpDirectory};
use crate::endpoint::{EndpointCandidate, EndpointPolicy};
use crate::probe::{CredentialProbe, HttpProber, ProbeOutcome, ValidProbe};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Outcome of a discovery run. No match is a normal end state, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryResult {
    pub matched: Option<ValidProbe>,
    /// Some endpoint explicitly rejected the credential before the scan stopped.
    pub saw_invalid: bool,
}

/// Build the ordered, sanitized, deduplicated candidate list. Entries failing sanitization
/// (onion hosts, plaintext transport, garbage) are dropped.
pub fn assemble_candidates(
    preferred: &EndpointCandidate,
    known: &[String],
    directory: &[String],
    policy: EndpointPolicy,
) -> Vec<EndpointCandidate> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    if seen.insert(preferred.clone()) {
        out.push(preferred.clone());
    }
    for raw in known.iter().chain(directory) {
        match EndpointCandidate::parse_with(raw, policy) {
            Ok(c) => {
                if seen.insert(c.clone()) {
                    out.push(c);
                }
            }
            Err(e) => tracing::debug!(candidate = %raw, reason = %e, "candidate dropped"),
        }
    }
    out
}

/// Discovery orchestrator.
pub struct CredentialDiscovery {
    prober: Arc<dyn CredentialProbe>,
    directory: Option<Arc<dyn Directory>>,
    config: DiscoveryConfig,
}

impl CredentialDiscovery {
    pub fn new(prober: Arc<dyn CredentialProbe>, config: DiscoveryConfig) -> Self {
        Self {
            prober,
            directory: None,
            config,
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// HTTP prober plus, when `directory_url` is set, an HTTP directory sharing its client.
    pub fn from_config(config: DiscoveryConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().no_proxy().build()?;
        let prober = Arc::new(HttpProber::with_client(client.clone()));
        let directory = config.directory_url.clone().map(|url| {
            Arc::new(HttpDirectory::new(url, client, config.directory_timeout)) as Arc<dyn Directory>
        });
        Ok(Self {
            prober,
            directory,
            config,
        })
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    async fn directory_endpoints(&self, budget: Duration) -> Vec<String> {
        let Some(dir) = &self.directory else {
            return Vec::new();
        };
        match timeout(budget, dir.endpoints()).await {
            Ok(urls) => urls,
            Err(_) => {
                tracing::warn!(budget = ?budget, "directory lookup exceeded its budget");
                Vec::new()
            }
        }
    }

    /// Candidates a run with this `preferred` endpoint and `known` snapshot would probe.
    pub async fn candidates(
        &self,
        preferred: &EndpointCandidate,
        known: &[String],
    ) -> Vec<EndpointCandidate> {
        let directory = self.directory_endpoints(self.config.directory_timeout).await;
        assemble_candidates(preferred, known, &directory, self.config.policy)
    }

    /// Probe candidates batch by batch and return the first endpoint accepting `credential`.
    ///
    /// `known` is a read-only snapshot of endpoints seen in earlier sessions. The first batch
    /// (preferred and known endpoints) is probed while the directory is fetched.
    pub async fn discover(
        &self,
        credential: &str,
        preferred: &EndpointCandidate,
        known: &[String],
    ) -> DiscoveryResult {
        let credential = credential.trim();
        if credential.is_empty() {
            tracing::warn!("discovery skipped: empty credential");
            return DiscoveryResult::default();
        }
        let policy = self.config.policy;
        let batch_size = self.config.batch_size.max(1);
        let local = assemble_candidates(preferred, known, &[], policy);
        let head = local.len().min(batch_size);
        let mut saw_invalid = false;

        // The directory shares the first batch's window.
        let directory_budget = self.config.directory_timeout.min(self.config.probe_timeout);
        let directory = self.directory_endpoints(directory_budget);
        let first = self.probe_batch(credential, &local[..head]);
        tokio::pin!(directory, first);
        let mut fetched = None;
        let outcomes = loop {
            tokio::select! {
                outcomes = &mut first => break outcomes,
                urls = &mut directory, if fetched.is_none() => fetched = Some(urls),
            }
        };
        if let Some(valid) = first_valid(outcomes, 0, &mut saw_invalid) {
            return DiscoveryResult {
                matched: Some(valid),
                saw_invalid,
            };
        }
        let directory = match fetched {
            Some(urls) => urls,
            None => directory.await,
        };

        // Local candidates are a prefix of the full list, so the first batch is never re-probed.
        let candidates = assemble_candidates(preferred, known, &directory, policy);
        for (n, batch) in candidates[head..].chunks(batch_size).enumerate() {
            let outcomes = self.probe_batch(credential, batch).await;
            if let Some(valid) = first_valid(outcomes, n + 1, &mut saw_invalid) {
                return DiscoveryResult {
                    matched: Some(valid),
                    saw_invalid,
                };
            }
        }
        tracing::info!(
            candidates = candidates.len(),
            saw_invalid,
            "no endpoint recognized the credential"
        );
        DiscoveryResult {
            matched: None,
            saw_invalid,
        }
    }

    /// Probe one batch fully in parallel; outcomes come back in candidate order.
    async fn probe_batch(&self, credential: &str, batch: &[EndpointCandidate]) -> Vec<ProbeOutcome> {
        let budget = self.config.probe_timeout;
        join_all(batch.iter().map(|endpoint| async move {
            match timeout(budget, self.prober.probe_credential(endpoint, credential, budget)).await {
                Ok(outcome) => outcome,
                Err(_) => ProbeOutcome::Unreachable {
                    endpoint: endpoint.clone(),
                },
            }
        }))
        .await
    }
}

fn first_valid(outcomes: Vec<ProbeOutcome>, batch_no: usize, saw_invalid: &mut bool) -> Option<ValidProbe> {
    for outcome in outcomes {
        match outcome {
            ProbeOutcome::Valid(valid) => {
                tracing::info!(
                    endpoint = %valid.endpoint,
                    balance = ?valid.balance,
                    batch = batch_no,
                    "credential recognized"
                );
                return Some(valid);
            }
            ProbeOutcome::Invalid { .. } => *saw_invalid = true,
            ProbeOutcome::Unreachable { .. } => {}
        }
    }
    None
}
