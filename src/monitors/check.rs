//! One check cycle: fetch, extract, compare with storage, persist and notify.

use super::extract;
use super::Selector;
use crate::alerts::NotifierSet;
use crate::error::{Error, Result};
use crate::fetch::ContentFetcher;
use crate::logging::{ellipse, preview};
use crate::storage::ContentStore;
use reqwest::header::HeaderMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Characters of old/new content included in a notification.
pub const PREVIEW_CHARS: usize = 200;

const LOG_PREVIEW_CHARS: usize = 120;

/// Everything a running monitor needs for a cycle.
pub struct CheckContext {
    pub id: String,
    pub name: String,
    pub url: String,
    pub headers: HeaderMap,
    pub selector: Selector,
    pub filters: Vec<String>,
    pub ignore_empty: bool,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub storage: Arc<dyn ContentStore>,
    pub notifiers: NotifierSet,
}

#[derive(Debug)]
pub enum CheckOutcome {
    Unchanged,
    /// Extracted content was empty and the monitor ignores empty results.
    SkippedEmpty,
    /// New content was stored. `notify_error` is set when some channels failed;
    /// the stored value is kept regardless.
    Changed {
        previous: String,
        current: String,
        notify_error: Option<Error>,
    },
}

/// Exact comparison, no normalization.
pub fn changed(previous: &str, current: &str) -> bool {
    previous != current
}

/// Subject and body sent when `name` changed from `previous` to `current`.
pub fn notification(name: &str, url: &str, previous: &str, current: &str) -> (String, String) {
    let subject = format!("{} has changed!", name);
    let body = format!(
        "New content:\n{}\n\nOld content:\n{}\n\nURL: {}",
        preview(current, PREVIEW_CHARS),
        preview(previous, PREVIEW_CHARS),
        url
    );
    (subject, body)
}

pub async fn run_check(ctx: &CheckContext) -> Result<CheckOutcome> {
    debug!("Monitor: checking {} ({})", ctx.name, ctx.url);

    let stream = ctx.fetcher.fetch(&ctx.url, &ctx.headers).await?;
    let current = extract::extract_stream(stream, &ctx.selector, &ctx.filters).await?;

    if current.is_empty() && ctx.ignore_empty {
        debug!("Monitor: {} extracted nothing, skipping cycle", ctx.name);
        return Ok(CheckOutcome::SkippedEmpty);
    }

    let previous = ctx.storage.get(&ctx.id)?;
    debug!(
        "Monitor: {} stored={:?} new={:?}",
        ctx.name,
        ellipse(&previous, LOG_PREVIEW_CHARS),
        ellipse(&current, LOG_PREVIEW_CHARS)
    );

    if !changed(&previous, &current) {
        debug!("Monitor: {} unchanged", ctx.name);
        return Ok(CheckOutcome::Unchanged);
    }

    ctx.storage.set(&ctx.id, &current)?;
    info!("Monitor: {} has changed ({})", ctx.name, ctx.url);

    let (subject, body) = notification(&ctx.name, &ctx.url, &previous, &current);
    let notify_error = ctx.notifiers.send(&subject, &body).await.err();
    if let Some(ref e) = notify_error {
        warn!("Monitor: {} change recorded but notification failed: {}", ctx.name, e);
    }

    Ok(CheckOutcome::Changed {
        previous,
        current,
        notify_error,
    })
}
