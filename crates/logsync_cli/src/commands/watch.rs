//! Watch command implementation.

use super::fetch::render_message;
use super::settings::CliError;
use logsync_engine::{
    HttpFetcher, MemoryCacheStore, Session, SessionView, SyncConfig, SyncEngine, TokioScheduler,
};
use logsync_protocol::{Encoding, MessageId};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

/// Tracks which messages were already printed.
#[derive(Debug)]
pub struct Printer {
    encoding: Encoding,
    seen: HashSet<MessageId>,
    last_error: Option<String>,
}

impl Printer {
    /// Creates a printer.
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            seen: HashSet::new(),
            last_error: None,
        }
    }

    /// Returns lines for messages not printed before, in view order.
    pub fn new_lines(&mut self, view: &SessionView) -> Vec<String> {
        let encoding = self.encoding;
        view.messages
            .iter()
            .filter(|m| self.seen.insert(m.id()))
            .map(|m| render_message(m, encoding))
            .collect()
    }

    /// Returns the error message if it differs from the last one reported.
    pub fn new_error(&mut self, view: &SessionView) -> Option<String> {
        let current = view.error.as_ref().map(ToString::to_string);
        if current == self.last_error {
            return None;
        }
        self.last_error = current.clone();
        current
    }
}

/// Runs the watch command until Ctrl-C.
pub async fn run(config: SyncConfig, collection: &str, pages: u32) -> Result<(), CliError> {
    let fetcher = HttpFetcher::from_config(&config)?;
    let encoding = config.encoding;
    let key = config.key_for(collection);
    let engine = Arc::new(SyncEngine::new(config, fetcher, MemoryCacheStore::new()));

    let session = Session::open(engine, key, &TokioScheduler);
    tracing::info!(key = %session.key(), "watching collection, press Ctrl-C to stop");

    let printer = Mutex::new(Printer::new(encoding));
    let (views_tx, mut views) = watch::channel(session.view());
    session.subscribe(move |view| {
        let mut printer = printer.lock();
        for line in printer.new_lines(view) {
            println!("{line}");
        }
        if let Some(error) = printer.new_error(view) {
            tracing::warn!(%error, "refresh failed, showing cached messages");
        }
        views_tx.send_replace(view.clone());
    })?;

    if pages > 0 {
        // Older pages can only follow once the first page is in.
        let _ = views.wait_for(|view| !view.loading).await;
        for _ in 0..pages {
            if !session.view().has_more {
                break;
            }
            session.load_more().await?;
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C, stopping");
    }
    session.shutdown().await;

    let stats = session.engine().stats();
    tracing::info!(
        refreshes = stats.refreshes,
        cache_hits = stats.cache_hits,
        delta_fetches = stats.delta_fetches,
        pages_loaded = stats.pages_loaded,
        errors = stats.errors,
        "stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use logsync_engine::SyncError;
    use logsync_protocol::{ConsensusTimestamp, Message};

    fn view(seconds: &[u64]) -> SessionView {
        SessionView {
            messages: seconds
                .iter()
                .map(|&s| Message::new(ConsensusTimestamp::from_seconds(s), s, "0.0.2", "aGk="))
                .collect(),
            ..SessionView::default()
        }
    }

    #[test]
    fn prints_each_message_once() {
        let mut printer = Printer::new(Encoding::Base64);
        assert_eq!(printer.new_lines(&view(&[100, 90])).len(), 2);

        let lines = printer.new_lines(&view(&[110, 100, 90]));
        assert_eq!(lines, vec!["110.000000000 #110 0.0.2: hi".to_string()]);
        assert!(printer.new_lines(&view(&[110, 100, 90])).is_empty());
    }

    #[test]
    fn reports_error_changes_only() {
        let mut printer = Printer::new(Encoding::Base64);
        let mut failing = view(&[1]);
        failing.error = Some(SyncError::transient("HTTP 503"));

        assert!(printer.new_error(&failing).unwrap().contains("503"));
        assert!(printer.new_error(&failing).is_none());
        assert!(printer.new_error(&view(&[1])).is_none());
        assert!(printer.new_error(&failing).is_some());
    }
}
