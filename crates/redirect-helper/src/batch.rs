//! Batch upserts: many (name-or-domain, target) items in one request.
//!
//! Items are validated and applied one by one. A failing item is recorded and
//! the batch carries on; the response reports every item plus a summary.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::auth::{self, TokenKind};
use crate::error::State;
use crate::store::{EntryKind, Store};
use crate::target;

/// One requested mapping. Exactly one of `name`/`domain` must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BatchEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

/// POST body; also what the GET form is parsed into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub redirect_token: Option<String>,
    #[serde(default)]
    pub domain_token: Option<String>,
    #[serde(default)]
    pub entries: Vec<BatchEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryResult {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub domain: String,
    pub target: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResponse {
    pub state: State,
    pub message: String,
    pub results: Vec<EntryResult>,
    pub summary: Summary,
}

/// Build a request from suffixed query parameters:
/// `name1=a&target1=x:1&domain2=b.com&target2=https://y&redirect_token=..`.
///
/// Every all-digit suffix seen on a `name`, `domain` or `target` key yields one
/// item; items without a target, or with neither name nor domain, are dropped.
/// Items come out in ascending suffix order. The first value of a repeated key wins.
pub fn parse_query(pairs: &[(String, String)]) -> BatchRequest {
    let mut suffixes: BTreeSet<(usize, &str)> = BTreeSet::new();
    for (key, _) in pairs {
        let suffix = ["name", "domain", "target"]
            .iter()
            .find_map(|prefix| key.strip_prefix(prefix))
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()));
        if let Some(suffix) = suffix {
            // Numeric order; suffixes too long for usize sort last.
            let rank = suffix.parse().unwrap_or(usize::MAX);
            suffixes.insert((rank, suffix));
        }
    }

    let entries = suffixes
        .into_iter()
        .filter_map(|(_, suffix)| {
            let name = first(pairs, &format!("name{suffix}"));
            let domain = first(pairs, &format!("domain{suffix}"));
            let target = first(pairs, &format!("target{suffix}"))?;
            if name.is_none() && domain.is_none() {
                return None;
            }
            Some(BatchEntry {
                name: name.map(str::to_string),
                domain: domain.map(str::to_string),
                target: Some(target.to_string()),
            })
        })
        .collect();

    BatchRequest {
        redirect_token: first(pairs, "redirect_token").map(str::to_string),
        domain_token: first(pairs, "domain_token").map(str::to_string),
        entries,
    }
}

fn first<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

/// Apply every item of `request` against `store` and summarise.
pub async fn apply(store: &Store, request: BatchRequest) -> BatchResponse {
    let redirect_token = request.redirect_token.unwrap_or_default();
    let domain_token = request.domain_token.unwrap_or_default();

    let mut results = Vec::with_capacity(request.entries.len());
    for entry in request.entries {
        let name = entry.name.unwrap_or_default();
        let domain = entry.domain.unwrap_or_default();
        let target = entry.target.unwrap_or_default();

        let outcome = apply_one(
            store,
            &name,
            &domain,
            &target,
            &redirect_token,
            &domain_token,
        )
        .await;
        results.push(EntryResult {
            name,
            domain,
            target,
            success: outcome.is_ok(),
            error: outcome.err(),
        });
    }

    summarise(results)
}

async fn apply_one(
    store: &Store,
    name: &str,
    domain: &str,
    target: &str,
    redirect_token: &str,
    domain_token: &str,
) -> Result<(), String> {
    if target.is_empty() {
        return Err("Missing target".to_string());
    }
    if !target::is_valid(target) {
        return Err("Invalid target format".to_string());
    }

    let (kind, key, token, token_kind) = match (name.is_empty(), domain.is_empty()) {
        (false, true) => {
            if redirect_token.is_empty() {
                return Err("Missing redirect_token".to_string());
            }
            (EntryKind::Path, name, redirect_token, TokenKind::Redirect)
        }
        (true, false) => {
            if domain_token.is_empty() {
                return Err("Missing domain_token".to_string());
            }
            (EntryKind::Domain, domain, domain_token, TokenKind::Domain)
        }
        _ => return Err("Must specify either name or domain, not both or neither".to_string()),
    };

    let settings = store.settings().await;
    if let Err(reason) = auth::authorize(token_kind, token, &settings) {
        tracing::warn!(kind = %kind, key = %key, reason = %reason, "Batch item rejected");
        return Err(format!("invalid {token_kind} token"));
    }

    match store.upsert(kind, key, target).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_storage() => {
            tracing::error!(kind = %kind, key = %key, error = %e, "Batch item not persisted");
            Err("storage failure".to_string())
        }
        Err(e) => Err(e.to_string()),
    }
}

fn summarise(results: Vec<EntryResult>) -> BatchResponse {
    let total = results.len();
    let succeeded = results.iter().filter(|r| r.success).count();
    let failed = total - succeeded;

    let (state, message) = if failed == 0 {
        (State::Success, "All entries updated successfully".to_string())
    } else if succeeded == 0 {
        (State::Error, "All entries failed to update".to_string())
    } else {
        (State::Partial, format!("{succeeded} succeeded, {failed} failed"))
    };

    BatchResponse {
        state,
        message,
        results,
        summary: Summary {
            total,
            succeeded,
            failed,
        },
    }
}
