use crate::hub::{ChannelKey, Hub};
use std::sync::Arc;
use std::time::Duration;

/// Spawn a background task that publishes hub figures to the `status` channel.
///
/// A value is only published when the figures change, so idle status
/// subscribers are not spammed.
pub fn spawn_status_reporter(hub: Arc<Hub>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last: Option<String> = None;

        loop {
            tokio::time::sleep(interval).await;

            let report = status_report(&hub).await;
            if last.as_ref() == Some(&report) {
                continue;
            }

            // Ignore publish errors; the status channel always resolves
            let _ = hub.publish(&ChannelKey::Status, report.clone()).await;
            last = Some(report);
        }
    })
}

pub async fn status_report(hub: &Hub) -> String {
    serde_json::json!({
        "connections": hub.active_connections(),
        "channels": hub.registry().len().await,
    })
    .to_string()
}
