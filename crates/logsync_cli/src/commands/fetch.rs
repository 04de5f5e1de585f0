//! Fetch command implementation.

use super::settings::CliError;
use logsync_engine::{FetchedPage, Fetcher, HttpFetcher, SyncConfig};
use logsync_protocol::{Encoding, Message};
use serde::Serialize;

/// Result of a one-shot fetch.
#[derive(Debug, Serialize)]
pub struct FetchResult<'a> {
    /// Collection id.
    pub collection: &'a str,
    /// Messages in the requested order.
    pub messages: &'a [Message],
    /// Link to the next page, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<&'a str>,
}

/// Runs the fetch command.
pub async fn run(config: &SyncConfig, collection: &str, format: &str) -> Result<(), CliError> {
    let fetcher = HttpFetcher::from_config(config)?;
    let key = config.key_for(collection);
    tracing::debug!(key = %key, "fetching first page");

    let page = fetcher.fetch_latest(&key).await?;

    match format {
        "json" => print_json(collection, &page)?,
        _ => print_text(&page, config.encoding),
    }
    Ok(())
}

fn print_json(collection: &str, page: &FetchedPage) -> Result<(), CliError> {
    let result = FetchResult {
        collection,
        messages: &page.messages,
        next: page.continuation_token.as_ref().map(|t| t.as_str()),
    };
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn print_text(page: &FetchedPage, encoding: Encoding) {
    for message in &page.messages {
        println!("{}", render_message(message, encoding));
    }
    if page.has_more {
        println!("(more pages available)");
    }
}

/// Renders one message as a single line.
///
/// Payloads that do not decode are shown raw.
pub fn render_message(message: &Message, encoding: Encoding) -> String {
    let payload = message
        .decode_payload(encoding)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_else(|_| message.message.clone());
    let chunk = match &message.chunk_info {
        Some(info) if info.total > 1 => format!(" [{}/{}]", info.number, info.total),
        _ => String::new(),
    };
    format!(
        "{} #{} {}{}: {}",
        message.consensus_timestamp,
        message.sequence_number,
        message.payer_account_id,
        chunk,
        payload
    )
}
