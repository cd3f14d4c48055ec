use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memesignal_core_types::Signal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::Publisher;

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    msg_type: &'static str,
    content: WebhookContent<'a>,
}

#[derive(Debug, Serialize)]
struct WebhookContent<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WebhookResponse {
    code: i64,
    msg: String,
}

/// Webhook sink posting a labelled plain-text summary of each signal.
pub struct FeishuPublisher {
    webhook_url: String,
    client: reqwest::Client,
}

impl FeishuPublisher {
    pub fn new(webhook_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build webhook http client")?;
        Ok(Self {
            webhook_url: webhook_url.into(),
            client,
        })
    }
}

#[async_trait]
impl Publisher for FeishuPublisher {
    fn type_name(&self) -> &'static str {
        "feishu"
    }

    async fn publish(&self, signal: &Signal) -> Result<()> {
        if self.webhook_url.is_empty() {
            return Err(anyhow!("webhook url is empty"));
        }
        let text = format_signal_message(signal);
        let message = WebhookMessage {
            msg_type: "text",
            content: WebhookContent { text: &text },
        };

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await
            .context("webhook request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("webhook returned status {status}"));
        }
        match response.json::<WebhookResponse>().await {
            Ok(body) if body.code != 0 => {
                Err(anyhow!("webhook rejected message: code {} ({})", body.code, body.msg))
            }
            Ok(_) => Ok(()),
            Err(error) => {
                warn!(error = %error, "webhook response body was not parseable");
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn data_str<'a>(signal: &'a Signal, key: &str) -> Option<&'a str> {
    signal.data.get(key).and_then(|value| value.as_str())
}

fn data_f64(signal: &Signal, key: &str) -> Option<f64> {
    signal.data.get(key).and_then(|value| value.as_f64())
}

fn data_u64(signal: &Signal, key: &str) -> Option<u64> {
    signal.data.get(key).and_then(|value| value.as_u64())
}

fn signal_type_label(signal: &Signal) -> &'static str {
    use memesignal_core_types::SignalType::*;
    match signal.signal_type {
        PriceSpike => "price spike",
        VolumeSpike => "volume spike",
        LargeTransaction => "large transaction",
        NewToken => "new token",
        WhaleActivity => "whale activity",
        CompositeSignal => "composite momentum",
    }
}

/// `$1.2k` / `$3.4M` / `$5.6B` compaction for volume and market cap.
fn format_compact_usd(value: f64) -> String {
    if value >= 1e9 {
        format!("${:.1}B", value / 1e9)
    } else if value >= 1e6 {
        format!("${:.1}M", value / 1e6)
    } else if value >= 1e3 {
        format!("${:.1}k", value / 1e3)
    } else {
        format!("${value:.2}")
    }
}

fn format_local_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub(crate) fn format_signal_message(signal: &Signal) -> String {
    let token_symbol = if signal.token_symbol.is_empty() {
        data_str(signal, "token_symbol").unwrap_or("UNKNOWN")
    } else {
        signal.token_symbol.as_str()
    };

    let current_price = data_str(signal, "current_price");
    let price_line = current_price
        .map(|price| format!("${price}"))
        .unwrap_or_else(|| "N/A".to_string());

    let market_cap = current_price
        .and_then(|price| Decimal::from_str(price).ok())
        .zip(
            data_str(signal, "token_supply").and_then(|supply| Decimal::from_str(supply).ok()),
        )
        .and_then(|(price, supply)| (price * supply).to_f64())
        .filter(|cap| *cap > 0.0)
        .map(format_compact_usd)
        .unwrap_or_else(|| "N/A".to_string());

    let price_change_5m = data_str(signal, "price_change_5m")
        .map(|change| format!("{change}%"))
        .unwrap_or_else(|| "N/A".to_string());
    let unique_wallets = data_u64(signal, "unique_wallets")
        .map(|count| count.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let holder_count = data_u64(signal, "holder_count")
        .map(|count| count.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let top10_share = data_f64(signal, "top10_holders_ratio")
        .map(|ratio| format!("{ratio:.2}%"))
        .unwrap_or_else(|| "N/A".to_string());
    let tx_count_5m = data_u64(signal, "tx_count_5m")
        .map(|count| count.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let volume_5m = data_str(signal, "volume_5m")
        .and_then(|volume| volume.parse::<f64>().ok())
        .map(format_compact_usd)
        .unwrap_or_else(|| "N/A".to_string());
    let bundle_ratio = data_f64(signal, "bundle_ratio")
        .map(|ratio| format!("{:.2}%", ratio * 100.0))
        .unwrap_or_else(|| "N/A".to_string());
    let phishing_ratio = data_f64(signal, "phishing_ratio")
        .map(|ratio| format!("{ratio:.2}%"))
        .unwrap_or_else(|| "N/A".to_string());

    format!(
        "Meme trade signal\n\n\
         Signal type: {signal_type}\n\
         Token symbol: {token_symbol}\n\
         Token address: {token_address}\n\
         Current price: {price_line}\n\
         Market cap: {market_cap}\n\
         5m change: {price_change_5m}\n\
         Unique wallets: {unique_wallets}\n\
         Holder count: {holder_count}\n\
         Top10 holder share: {top10_share}\n\
         5m trade count: {tx_count_5m}\n\
         5m volume: {volume_5m}\n\
         Bundle ratio: {bundle_ratio}\n\
         Phishing ratio: {phishing_ratio}\n\n\
         GMGN: https://gmgn.ai/sol/token/{token_address}\n\
         Trade time: {trade_time}\n\
         Trigger time: {trigger_time}",
        signal_type = signal_type_label(signal),
        token_address = signal.token_address,
        trade_time = format_local_time(signal.source_trade.block_time),
        trigger_time = format_local_time(signal.timestamp),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_carries_every_labelled_line() {
        let mut signal = crate::tests::sample_signal();
        signal.data.insert("current_price".to_string(), json!("1.1"));
        signal
            .data
            .insert("token_supply".to_string(), json!("1000000000"));
        signal
            .data
            .insert("price_change_5m".to_string(), json!("4.2"));
        signal.data.insert("unique_wallets".to_string(), json!(10));
        signal.data.insert("tx_count_5m".to_string(), json!(11));
        signal.data.insert("volume_5m".to_string(), json!("6900"));
        signal.data.insert("bundle_ratio".to_string(), json!(0.12));
        signal.data.insert("phishing_ratio".to_string(), json!(3.4));
        signal.data.insert("holder_count".to_string(), json!(520));
        signal
            .data
            .insert("top10_holders_ratio".to_string(), json!(18.523));

        let text = format_signal_message(&signal);
        assert!(text.contains("Signal type: whale activity"));
        assert!(text.contains("Token symbol: TOK"));
        assert!(text.contains("Current price: $1.1"));
        assert!(text.contains("Market cap: $1.1B"));
        assert!(text.contains("5m change: 4.2%"));
        assert!(text.contains("Unique wallets: 10"));
        assert!(text.contains("Holder count: 520"));
        assert!(text.contains("Top10 holder share: 18.52%"));
        assert!(text.contains("5m trade count: 11"));
        assert!(text.contains("5m volume: $6.9k"));
        assert!(text.contains("Bundle ratio: 12.00%"));
        assert!(text.contains("Phishing ratio: 3.40%"));
        assert!(text.contains("GMGN: https://gmgn.ai/sol/token/TokenMint"));
    }

    #[test]
    fn missing_enrichment_renders_not_available() {
        let signal = crate::tests::sample_signal();
        let text = format_signal_message(&signal);
        assert!(text.contains("Current price: N/A"));
        assert!(text.contains("Market cap: N/A"));
        assert!(text.contains("Bundle ratio: N/A"));
        assert!(text.contains("Phishing ratio: N/A"));
    }

    #[test]
    fn compact_usd_formatting_scales() {
        assert_eq!(format_compact_usd(12.3456), "$12.35");
        assert_eq!(format_compact_usd(6_900.0), "$6.9k");
        assert_eq!(format_compact_usd(2_500_000.0), "$2.5M");
        assert_eq!(format_compact_usd(7_100_000_000.0), "$7.1B");
    }
}
