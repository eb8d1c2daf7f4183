use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::models::{
    truncate_webhook_response, EventType, Notification, PriceSnapshot, TrackedItem,
};
use crate::store::Store;
use crate::utils::error::Result;

/// Webhook dispatcher with at-most-once semantics. The notification row is
/// inserted first; only the run that wins that insert performs the POST, so
/// concurrent checks cannot double-send. A crash between claim and send
/// leaves the row with `sent_at = NULL` for operator triage.
pub struct Notifier {
    store: Store,
    http: reqwest::Client,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(store: Store, webhook_url: Option<String>) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            webhook_url,
        }
    }

    pub async fn notify_price_change(
        &self,
        item: &TrackedItem,
        snapshot: &PriceSnapshot,
        old_price_cents: Option<i64>,
    ) -> Result<()> {
        let message = format!(
            "**Price Change Detected**\nProduct: {}\nOld Price: {}\nNew Price: {}\nLink: {}\nChecked: {}",
            snapshot.product_name,
            format_price(old_price_cents),
            format_price(snapshot.price_cents),
            item.url,
            snapshot.checked_at.to_rfc3339(),
        );
        self.dispatch(item, snapshot, EventType::PriceChanged, message)
            .await
    }

    pub async fn notify_back_in_stock(
        &self,
        item: &TrackedItem,
        snapshot: &PriceSnapshot,
    ) -> Result<()> {
        let message = format!(
            "**Back In Stock**\nProduct: {}\nPrice: {}\nLink: {}\nChecked: {}",
            snapshot.product_name,
            format_price(snapshot.price_cents),
            item.url,
            snapshot.checked_at.to_rfc3339(),
        );
        self.dispatch(item, snapshot, EventType::BackInStock, message)
            .await
    }

    /// Claim-then-send. Losing the claim means another run already owns
    /// this event; abort silently.
    async fn dispatch(
        &self,
        item: &TrackedItem,
        snapshot: &PriceSnapshot,
        event_type: EventType,
        message: String,
    ) -> Result<()> {
        let notification =
            Notification::claim(item.id.clone(), snapshot.id.clone(), event_type);
        if !self.store.claim_notification(&notification).await? {
            return Ok(());
        }

        let Some(webhook_url) = &self.webhook_url else {
            self.store
                .record_notification_outcome(
                    &notification.id,
                    0,
                    "DISCORD_WEBHOOK_URL not configured",
                    None,
                )
                .await?;
            return Ok(());
        };

        let (status, body) = self.post(webhook_url, &message).await;
        self.store
            .record_notification_outcome(
                &notification.id,
                status,
                &truncate_webhook_response(&body),
                if status > 0 { Some(Utc::now()) } else { None },
            )
            .await?;

        info!(
            item_id = %item.id,
            event = event_type.as_str(),
            status,
            "notification dispatched"
        );
        Ok(())
    }

    async fn post(&self, webhook_url: &str, content: &str) -> (i64, String) {
        let response = self
            .http
            .post(webhook_url)
            .json(&json!({ "content": content }))
            .send()
            .await;

        match response {
            Ok(r) => {
                let status = r.status().as_u16() as i64;
                let body = r.text().await.unwrap_or_default();
                (status, body)
            }
            Err(e) => {
                warn!(error = %e, "webhook POST failed");
                (0, e.to_string())
            }
        }
    }

    /// Fire a fixed test message at the configured webhook, bypassing the
    /// claim table. Returns the raw response for the caller to display.
    pub async fn send_test(&self) -> Result<(i64, String)> {
        let Some(webhook_url) = &self.webhook_url else {
            return Ok((0, "DISCORD_WEBHOOK_URL not configured".to_string()));
        };
        Ok(self
            .post(webhook_url, "pricehawk webhook test: hello from your tracker")
            .await)
    }
}

/// `$1,299.99`-style rendering of integer cents; absent prices show as N/A.
pub fn format_price(cents: Option<i64>) -> String {
    let Some(cents) = cents else {
        return "N/A".to_string();
    };

    let dollars = cents / 100;
    let fraction = (cents % 100).abs();

    let digits = dollars.abs().to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if dollars < 0 { "-" } else { "" };
    format!("{sign}${grouped}.{fraction:02}")
}
