use anyhow::Result;
use memesignal_core_types::Trade;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::TradeSource;

const TRADE_FANIN_CAPACITY: usize = 100_000;
const ERROR_FANIN_CAPACITY: usize = 100;

/// Fan-in over every registered source into one trade stream and one
/// error stream. Per-source arrival order is preserved; ordering across
/// sources is not defined.
pub struct SourceManager {
    sources: Vec<Box<dyn TradeSource>>,
}

impl SourceManager {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    pub fn add_source(&mut self, source: Box<dyn TradeSource>) {
        self.sources.push(source);
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// True once every source finished its bootstrap. False while no
    /// source is registered.
    pub fn is_initial_loaded(&self) -> bool {
        !self.sources.is_empty()
            && self
                .sources
                .iter()
                .all(|source| source.is_initial_loaded())
    }

    /// Start every source and forward its streams into the shared
    /// channels. Forward loops exit on cancellation or source close.
    pub async fn start(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(mpsc::Receiver<Trade>, mpsc::Receiver<anyhow::Error>)> {
        let (trade_tx, trade_rx) = mpsc::channel(TRADE_FANIN_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(ERROR_FANIN_CAPACITY);

        for source in &mut self.sources {
            let name = source.name();
            let stream = source.start(cancel.child_token()).await?;
            info!(source = name, "source started");
            tokio::spawn(forward_stream(
                name,
                stream,
                trade_tx.clone(),
                error_tx.clone(),
                cancel.child_token(),
            ));
        }
        Ok((trade_rx, error_rx))
    }
}

impl Default for SourceManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn forward_stream(
    name: &'static str,
    mut stream: crate::SourceStream,
    trade_tx: mpsc::Sender<Trade>,
    error_tx: mpsc::Sender<anyhow::Error>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(source = name, "source forward loop cancelled");
                return;
            }
            maybe_trade = stream.trades.recv() => {
                let Some(trade) = maybe_trade else {
                    debug!(source = name, "source trade stream closed");
                    return;
                };
                tokio::select! {
                    result = trade_tx.send(trade) => {
                        if result.is_err() {
                            return;
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
            maybe_error = stream.errors.recv() => {
                if let Some(error) = maybe_error {
                    let _ = error_tx.try_send(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SourceStream;
    use async_trait::async_trait;
    use chrono::Utc;
    use memesignal_core_types::TradeAction;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct ScriptedSource {
        trades: Vec<Trade>,
        loaded: Arc<AtomicBool>,
    }

    #[async_trait]
    impl TradeSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn is_initial_loaded(&self) -> bool {
            self.loaded.load(Ordering::Acquire)
        }

        async fn start(&mut self, _cancel: CancellationToken) -> Result<SourceStream> {
            let (trade_tx, trade_rx) = mpsc::channel(16);
            let (_error_tx, error_rx) = mpsc::channel(4);
            let trades = std::mem::take(&mut self.trades);
            let loaded = Arc::clone(&self.loaded);
            tokio::spawn(async move {
                for trade in trades {
                    if trade_tx.send(trade).await.is_err() {
                        return;
                    }
                }
                loaded.store(true, Ordering::Release);
            });
            Ok(SourceStream {
                trades: trade_rx,
                errors: error_rx,
            })
        }
    }

    fn trade(sig: &str) -> Trade {
        Trade {
            id: format!("{sig}_0"),
            signature: sig.to_string(),
            instruction_index: "0".to_string(),
            slot: 1,
            block_time: Utc::now(),
            user_wallet: "w".to_string(),
            token_address: "tok".to_string(),
            amount_usd: dec!(10),
            price_usd: dec!(1),
            action: TradeAction::Buy,
        }
    }

    #[tokio::test]
    async fn forwards_trades_in_source_order() -> Result<()> {
        let cancel = CancellationToken::new();
        let mut manager = SourceManager::new();
        manager.add_source(Box::new(ScriptedSource {
            trades: vec![trade("a"), trade("b"), trade("c")],
            loaded: Arc::new(AtomicBool::new(false)),
        }));

        let (mut trades, _errors) = manager.start(&cancel).await?;
        for expected in ["a", "b", "c"] {
            let received = trades.recv().await.expect("trade forwarded");
            assert_eq!(received.signature, expected);
        }
        cancel.cancel();
        Ok(())
    }

    #[tokio::test]
    async fn initial_loaded_requires_every_source() -> Result<()> {
        let loaded = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicBool::new(false));
        let mut manager = SourceManager::new();
        assert!(!manager.is_initial_loaded());

        manager.add_source(Box::new(ScriptedSource {
            trades: vec![],
            loaded: Arc::clone(&loaded),
        }));
        manager.add_source(Box::new(ScriptedSource {
            trades: vec![],
            loaded: Arc::clone(&pending),
        }));

        loaded.store(true, Ordering::Release);
        assert!(!manager.is_initial_loaded());
        pending.store(true, Ordering::Release);
        assert!(manager.is_initial_loaded());
        Ok(())
    }
}
