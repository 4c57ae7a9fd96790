//! The risk assessment pipeline
//!
//! Every check can raise the running [`RiskVerdict`] but never lower it, checks run in order:
//!
//! 1. origin blacklist
//! 2. known phishing lookup, best effort
//! 3. unlimited token approvals
//! 4. outgoing value with nothing coming back
//! 5. first connection to an origin that isn't whitelisted

use crate::{
    config::RiskConfig,
    reputation::{ReputationService, Simulation},
};
use alloy_primitives::ChainId;
use provider_bridge_core::{
    Origin, ProviderRequest, RiskLevel, RiskVerdict,
    request::SignPayload,
    risk::{Amount, ApprovalGrant, Asset, BalanceChanges},
};
use std::{fmt, sync::Arc};
use tracing::{debug, trace};

pub mod decode;

/// What the pipeline looks at
#[derive(Clone, Copy, Debug)]
pub struct RiskInput<'a> {
    pub origin: &'a Origin,
    pub request: &'a ProviderRequest,
    /// The chain the request would execute on
    pub chain_id: ChainId,
    /// Whether the origin was never connected before
    pub first_visit: bool,
}

/// How an origin matched a list entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ListMatch {
    /// Same origin or same host
    Exact,
    /// Subdomain of a listed domain
    Subdomain,
}

/// Computes a [`RiskVerdict`] per request. Verdicts are never cached, each request is assessed
/// on its own payload.
#[derive(Clone)]
pub struct RiskPipeline {
    config: Arc<RiskConfig>,
    reputation: Arc<dyn ReputationService>,
}

impl RiskPipeline {
    pub fn new(config: RiskConfig, reputation: Arc<dyn ReputationService>) -> Self {
        Self { config: Arc::new(config), reputation }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Runs every check against the request.
    pub async fn assess(&self, input: RiskInput<'_>) -> RiskVerdict {
        let mut verdict = RiskVerdict::safe();

        self.check_blacklist(input.origin, &mut verdict);
        self.check_phishing(input.origin, &mut verdict).await;

        let effects = self.effects(&input).await;
        self.check_approvals(&effects.approvals, &mut verdict);
        self.check_outflow(&effects.changes, &effects.approvals, &mut verdict);

        if input.first_visit && self.whitelisted(input.origin).is_none() {
            verdict.raise(
                RiskLevel::Warning,
                format!("This is your first connection to {}", input.origin),
            );
        }

        trace!(
            target: "bridge::risk",
            origin = %input.origin,
            method = input.request.method(),
            level = %verdict.level,
            findings = verdict.findings.len(),
            "assessed request"
        );
        verdict
    }

    /// Runs the origin checks only, the part of the pipeline that applies to a remembered
    /// reconnect.
    pub async fn assess_origin(&self, origin: &Origin) -> RiskVerdict {
        let mut verdict = RiskVerdict::safe();
        self.check_blacklist(origin, &mut verdict);
        self.check_phishing(origin, &mut verdict).await;
        verdict
    }

    fn check_blacklist(&self, origin: &Origin, verdict: &mut RiskVerdict) {
        match list_match(&self.config.blacklist, origin) {
            Some(ListMatch::Exact) => {
                verdict.raise(RiskLevel::Forbidden, format!("{origin} is on the blacklist"))
            }
            Some(ListMatch::Subdomain) => verdict.raise(
                RiskLevel::Danger,
                format!("{origin} belongs to a blacklisted domain"),
            ),
            None => {}
        }
    }

    async fn check_phishing(&self, origin: &Origin, verdict: &mut RiskVerdict) {
        let timeout = self.config.reputation_timeout();
        match tokio::time::timeout(timeout, self.reputation.check_origin(origin)).await {
            Ok(Ok(reputation)) => {
                if reputation.phishing {
                    let reason = reputation.reason.map(|r| format!(": {r}")).unwrap_or_default();
                    verdict.raise(
                        RiskLevel::Danger,
                        format!("{origin} is a known phishing site{reason}"),
                    );
                }
            }
            Ok(Err(err)) => {
                debug!(target: "bridge::risk", %origin, %err, "skipping phishing check")
            }
            Err(_) => {
                debug!(target: "bridge::risk", %origin, ?timeout, "phishing check timed out")
            }
        }
    }

    /// The balance changes and approvals of the request, from the simulation service if it
    /// answers in time and from local decoding otherwise.
    async fn effects(&self, input: &RiskInput<'_>) -> Simulation {
        match input.request.sign_payload() {
            Some(SignPayload::Transaction { request, .. }) => {
                let timeout = self.config.reputation_timeout();
                match tokio::time::timeout(
                    timeout,
                    self.reputation.simulate(input.chain_id, &request),
                )
                .await
                {
                    Ok(Ok(simulation)) => simulation,
                    Ok(Err(err)) => {
                        debug!(target: "bridge::risk", %err, "simulation unavailable, decoding locally");
                        decode::decode_transaction(&request)
                    }
                    Err(_) => {
                        debug!(target: "bridge::risk", ?timeout, "simulation timed out, decoding locally");
                        decode::decode_transaction(&request)
                    }
                }
            }
            Some(SignPayload::TypedData(data)) => {
                Simulation { approvals: decode::permit_approvals(&data), ..Default::default() }
            }
            _ => Simulation::default(),
        }
    }

    fn check_approvals(&self, approvals: &[ApprovalGrant], verdict: &mut RiskVerdict) {
        for approval in approvals {
            match approval.amount {
                Amount::Known(amount) if amount >= self.config.unlimited_approval_threshold => {
                    verdict.raise(
                        RiskLevel::Danger,
                        format!(
                            "Grants {} an unlimited allowance on token {}",
                            approval.spender, approval.token
                        ),
                    )
                }
                Amount::Unknown => verdict.raise(
                    RiskLevel::Danger,
                    format!(
                        "Grants {} control over all assets of {}",
                        approval.spender, approval.token
                    ),
                ),
                Amount::Known(_) => {}
            }
        }
    }

    fn check_outflow(
        &self,
        changes: &BalanceChanges,
        approvals: &[ApprovalGrant],
        verdict: &mut RiskVerdict,
    ) {
        // anything received offsets what is sent, an approval has no counterpart either way
        let sends = if changes.receive.is_empty() { changes.send.as_slice() } else { &[] };
        for change in sends {
            let level = match (change.asset, change.amount, change.usd_value) {
                (_, _, Some(usd)) => self.usd_level(usd),
                (Asset::Native, Amount::Known(value), None) => {
                    if value >= self.config.value_danger_wei {
                        Some(RiskLevel::Danger)
                    } else if value >= self.config.value_warning_wei {
                        Some(RiskLevel::Warning)
                    } else {
                        None
                    }
                }
                // value can't be estimated
                _ => Some(RiskLevel::Warning),
            };
            if let Some(level) = level {
                verdict.raise(
                    level,
                    format!(
                        "Sends {} of {} with nothing in return",
                        change.amount,
                        asset_name(&change.asset)
                    ),
                );
            }
        }
        for approval in approvals {
            if let Amount::Known(amount) = approval.amount &&
                amount < self.config.unlimited_approval_threshold &&
                !amount.is_zero()
            {
                verdict.raise(
                    RiskLevel::Warning,
                    format!(
                        "Allows {} to spend {amount} of token {}",
                        approval.spender, approval.token
                    ),
                );
            }
        }
    }

    fn usd_level(&self, usd: f64) -> Option<RiskLevel> {
        if usd >= self.config.value_danger_usd {
            Some(RiskLevel::Danger)
        } else if usd >= self.config.value_warning_usd {
            Some(RiskLevel::Warning)
        } else {
            None
        }
    }

    fn whitelisted(&self, origin: &Origin) -> Option<ListMatch> {
        list_match(&self.config.whitelist, origin).filter(|m| *m == ListMatch::Exact)
    }
}

impl fmt::Debug for RiskPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RiskPipeline").field("config", &self.config).finish_non_exhaustive()
    }
}

fn asset_name(asset: &Asset) -> String {
    match asset {
        Asset::Native => "the native currency".to_string(),
        Asset::Erc20(token) => format!("token {token}"),
        Asset::Nft(collection) => format!("collection {collection}"),
    }
}

/// Matches an origin against a list of origins (`https://app.example`) or bare domains
/// (`app.example`). Returns the strongest match.
fn list_match(list: &[String], origin: &Origin) -> Option<ListMatch> {
    let mut found = None;
    for entry in list {
        let domain = if entry.contains("://") {
            match Origin::parse(entry) {
                Ok(listed) if listed == *origin => return Some(ListMatch::Exact),
                Ok(listed) => listed.host().to_string(),
                Err(_) => continue,
            }
        } else {
            entry.trim().trim_end_matches('/').to_ascii_lowercase()
        };
        if domain.is_empty() {
            continue;
        }
        if origin.host() == domain {
            return Some(ListMatch::Exact);
        }
        if origin.is_within(&domain) {
            found = Some(ListMatch::Subdomain);
        }
    }
    found
}
