use anyhow::Result;
use async_trait::async_trait;
use memesignal_core_types::Trade;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod manager;
mod source;

pub use self::manager::SourceManager;
pub use self::source::{convert_swap, DatabaseSource};

/// Channel pair handed out by a started source. Trades arrive in the
/// order the source emits them; backend errors travel separately.
pub struct SourceStream {
    pub trades: mpsc::Receiver<Trade>,
    pub errors: mpsc::Receiver<anyhow::Error>,
}

/// A monotone stream of trades. `is_initial_loaded` flips once the
/// bootstrap over the initial time window has been fully emitted.
#[async_trait]
pub trait TradeSource: Send {
    fn name(&self) -> &'static str;

    fn is_initial_loaded(&self) -> bool;

    /// Spawn the source's poll task and hand back its output channels.
    async fn start(&mut self, cancel: CancellationToken) -> Result<SourceStream>;
}
