use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::calendar::CalendarTable;
use crate::clock;
use crate::message;
use crate::models::{DayInfo, DispatchReport, NotificationMessage, Slot};
use crate::push::{DeliveryError, PushTransport};
use crate::subscriptions::SubscriptionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Failed,
}

/// What a slot's notification is about, before dedup and fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotContent {
    pub date: NaiveDate,
    pub info: Option<DayInfo>,
    pub message: NotificationMessage,
}

/// Morning resolves today; evening resolves the next day with a cycle day.
pub fn resolve_content(calendar: &CalendarTable, slot: Slot, now: DateTime<Utc>) -> SlotContent {
    let (date, info, is_tomorrow) = match slot {
        Slot::Morning => {
            let today = clock::today_info(calendar, now);
            (today.date, today.info, false)
        }
        Slot::Evening => {
            let next = clock::next_school_day_info(calendar, now);
            (next.date, next.info, next.is_tomorrow)
        }
    };
    let message = message::build_message(date, info.as_ref(), slot, is_tomorrow);
    SlotContent { date, info, message }
}

pub struct Dispatcher {
    calendar: Arc<CalendarTable>,
    store: SubscriptionStore,
    transport: Arc<dyn PushTransport>,
}

impl Dispatcher {
    pub fn new(
        calendar: Arc<CalendarTable>,
        store: SubscriptionStore,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        Self {
            calendar,
            store,
            transport,
        }
    }

    /// Sends the slot's notification to every stored subscription at most once
    /// per `(slot, date)` while the dedup marker lives.
    ///
    /// The marker is written before fan-out, so a crash mid-send drops the rest
    /// of the batch rather than repeating it. Two concurrent calls can still both
    /// pass the marker check.
    pub async fn dispatch(&self, slot: Slot, now: DateTime<Utc>) -> anyhow::Result<DispatchReport> {
        let content = resolve_content(&self.calendar, slot, now);
        let date = content.date;

        if let Some(sent_at) = self.store.dedup_marker(slot, date).await? {
            info!(%slot, %date, %sent_at, "notification already sent, skipping");
            return Ok(DispatchReport {
                sent: 0,
                failed: 0,
                skipped: true,
                date,
                slot,
            });
        }
        self.store.mark_sent(slot, date).await?;

        let payload = message::push_payload(&content.message)?;
        let endpoints = self.store.list_endpoints().await?;
        if endpoints.is_empty() {
            info!(%slot, %date, "no subscriptions to notify");
            return Ok(DispatchReport {
                sent: 0,
                failed: 0,
                skipped: false,
                date,
                slot,
            });
        }

        let outcomes = join_all(
            endpoints
                .iter()
                .map(|endpoint| self.deliver(endpoint, &payload)),
        )
        .await;

        let sent = outcomes.iter().filter(|o| **o == Delivery::Sent).count();
        let failed = outcomes.len() - sent;
        info!(%slot, %date, sent, failed, title = %content.message.title, "dispatch finished");

        Ok(DispatchReport {
            sent,
            failed,
            skipped: false,
            date,
            slot,
        })
    }

    async fn deliver(&self, endpoint: &str, payload: &[u8]) -> Delivery {
        let subscription = match self.store.get(endpoint).await {
            Ok(Some(subscription)) => subscription,
            Ok(None) => {
                debug!(endpoint, "endpoint has no stored subscription, pruning");
                if let Err(err) = self.store.forget_endpoint(endpoint).await {
                    warn!(endpoint, error = %err, "failed to prune stale endpoint");
                }
                return Delivery::Failed;
            }
            Err(err) => {
                warn!(endpoint, error = %err, "failed to load subscription");
                return Delivery::Failed;
            }
        };

        match self.transport.send(&subscription, payload).await {
            Ok(()) => Delivery::Sent,
            Err(DeliveryError::Gone) => {
                info!(endpoint, "push endpoint gone, removing subscription");
                if let Err(err) = self.store.remove(endpoint).await {
                    warn!(endpoint, error = %err, "failed to remove dead subscription");
                }
                Delivery::Failed
            }
            Err(err @ DeliveryError::Transient(_)) => {
                warn!(endpoint, error = %err, "push delivery failed");
                Delivery::Failed
            }
        }
    }
}
