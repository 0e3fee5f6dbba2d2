//! Applies payment-provider events to the stored subscription state.
//!
//! Every transition is an absolute overwrite of a fixed set of profile
//! fields, so replaying an event (provider retry after a 500) is harmless.
//! Events older than the last one applied to a profile are discarded.

use serde_json::Value;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::subscription_repository::SubscriptionRepository;
use crate::models::{
    plan::{get_plan, PlanTier},
    subscription::{
        BillingPeriod, NewSubscriptionHistoryEntry, SubscriptionProfile, SubscriptionStatus,
        SubscriptionUpdate,
    },
};
use crate::services::stripe::{ProviderSubscription, StripeEvent};

const DEFAULT_CURRENCY: &str = "usd";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingEvent {
    CheckoutCompleted,
    SubscriptionUpserted,
    SubscriptionDeleted,
    InvoicePaid,
    InvoiceFailed,
}

impl BillingEvent {
    pub fn from_type(event_type: &str) -> Option<Self> {
        match event_type {
            "checkout.session.completed" => Some(Self::CheckoutCompleted),
            "customer.subscription.created" | "customer.subscription.updated" => {
                Some(Self::SubscriptionUpserted)
            }
            "customer.subscription.deleted" => Some(Self::SubscriptionDeleted),
            "invoice.payment_succeeded" | "invoice.paid" => Some(Self::InvoicePaid),
            "invoice.payment_failed" => Some(Self::InvoiceFailed),
            _ => None,
        }
    }

    pub fn transition(&self) -> &'static str {
        match self {
            Self::CheckoutCompleted => "checkout_completed",
            Self::SubscriptionUpserted => "subscription_upserted",
            Self::SubscriptionDeleted => "subscription_deleted",
            Self::InvoicePaid => "invoice_paid",
            Self::InvoiceFailed => "invoice_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Applied {
        user_id: Uuid,
        transition: &'static str,
    },
    /// No profile matches the event; acknowledged so the provider stops retrying.
    Orphaned { customer_id: Option<String> },
    /// The profile already reflects a newer event.
    Stale { user_id: Uuid },
    /// The event can never be applied (missing metadata, unknown plan).
    Invalid { reason: String },
    Ignored { event_type: String },
}

impl ReconcileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Orphaned { .. } => "orphaned",
            Self::Stale { .. } => "stale",
            Self::Invalid { .. } => "invalid",
            Self::Ignored { .. } => "ignored",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// The stored profile moved past the snapshot the resync was built from.
    #[error("profile {0} changed during resync")]
    Superseded(Uuid),
}

/// One reconciliation step: the field overwrites plus its audit row.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub update: SubscriptionUpdate,
    pub history: NewSubscriptionHistoryEntry,
}

struct EventContext<'a> {
    id: &'a str,
    event_type: &'a str,
    at: OffsetDateTime,
}

impl EventContext<'_> {
    fn history(
        &self,
        user_id: Uuid,
        plan: PlanTier,
        status: SubscriptionStatus,
        amount: i64,
        currency: Option<&str>,
    ) -> NewSubscriptionHistoryEntry {
        NewSubscriptionHistoryEntry {
            user_id,
            plan,
            status,
            amount,
            currency: currency.unwrap_or(DEFAULT_CURRENCY).to_ascii_lowercase(),
            event_id: Some(self.id.to_string()),
            event_type: self.event_type.to_string(),
            recorded_at: self.at,
        }
    }
}

/// Walks `path` through nested JSON objects.
fn jget<'a>(val: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = val;
    for key in path {
        cur = cur.get(*key)?;
    }
    Some(cur)
}

fn extract_str<'a>(val: &'a Value, path: &[&str]) -> Option<&'a str> {
    jget(val, path)?.as_str().filter(|s| !s.is_empty())
}

fn extract_i64(val: &Value, path: &[&str]) -> Option<i64> {
    jget(val, path)?.as_i64()
}

fn timestamp(secs: Option<i64>) -> Option<OffsetDateTime> {
    secs.and_then(|s| OffsetDateTime::from_unix_timestamp(s).ok())
}

fn event_time(event: &StripeEvent) -> OffsetDateTime {
    timestamp(event.created).unwrap_or_else(OffsetDateTime::now_utc)
}

/// `metadata.userId`, accepting `user_id` and `client_reference_id` as fallbacks.
fn checkout_user_id(object: &Value) -> Option<Uuid> {
    extract_str(object, &["metadata", "userId"])
        .or_else(|| extract_str(object, &["metadata", "user_id"]))
        .or_else(|| extract_str(object, &["client_reference_id"]))
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

fn metadata_plan_id(object: &Value) -> Option<&str> {
    extract_str(object, &["metadata", "planId"]).or_else(|| extract_str(object, &["metadata", "plan_id"]))
}

/// Current period from the subscription, falling back to its first item
/// (newer API versions only report it per item).
fn subscription_period(object: &Value) -> BillingPeriod {
    let first_item = jget(object, &["items", "data"])
        .and_then(|items| items.as_array())
        .and_then(|items| items.first());
    let read = |key: &str| {
        extract_i64(object, &[key]).or_else(|| first_item.and_then(|item| extract_i64(item, &[key])))
    };
    BillingPeriod {
        start: timestamp(read("current_period_start")),
        end: timestamp(read("current_period_end")),
    }
}

fn subscription_amount(object: &Value) -> (i64, Option<&str>) {
    let first_item = jget(object, &["items", "data"])
        .and_then(|items| items.as_array())
        .and_then(|items| items.first());
    let amount = first_item
        .and_then(|item| {
            let unit = extract_i64(item, &["price", "unit_amount"])?;
            let quantity = extract_i64(item, &["quantity"]).unwrap_or(1);
            Some(unit * quantity)
        })
        .unwrap_or(0);
    let currency = extract_str(object, &["currency"])
        .or_else(|| first_item.and_then(|item| extract_str(item, &["price", "currency"])));
    (amount, currency)
}

fn checkout_completed(
    profile: &SubscriptionProfile,
    plan: PlanTier,
    object: &Value,
    ctx: &EventContext<'_>,
) -> Transition {
    let subscription_id = extract_str(object, &["subscription"]).map(str::to_string);
    let update = SubscriptionUpdate {
        plan: Some(plan),
        status: Some(SubscriptionStatus::Active),
        external_subscription_id: subscription_id.map(Some),
        last_event_at: Some(ctx.at),
        ..Default::default()
    };
    let history = ctx.history(
        profile.user_id,
        plan,
        SubscriptionStatus::Active,
        extract_i64(object, &["amount_total"]).unwrap_or(0),
        extract_str(object, &["currency"]),
    );
    Transition { update, history }
}

fn subscription_upserted(
    profile: &SubscriptionProfile,
    object: &Value,
    ctx: &EventContext<'_>,
) -> Result<Transition, String> {
    let status = extract_str(object, &["status"])
        .map(SubscriptionStatus::from_provider)
        .ok_or_else(|| "subscription event has no status".to_string())?;
    let subscription_id = extract_str(object, &["id"])
        .ok_or_else(|| "subscription event has no id".to_string())?
        .to_string();

    let plan = match metadata_plan_id(object) {
        Some(raw) => match get_plan(raw) {
            Some(plan) => Some(plan.id),
            None => {
                warn!(plan_id = raw, event_id = ctx.id, "unknown plan on subscription; keeping current plan");
                None
            }
        },
        None => None,
    };

    let (amount, currency) = subscription_amount(object);
    let history = ctx.history(
        profile.user_id,
        plan.unwrap_or(profile.plan),
        status.clone(),
        amount,
        currency,
    );
    let update = SubscriptionUpdate {
        plan,
        status: Some(status),
        external_subscription_id: Some(Some(subscription_id)),
        billing_period: Some(subscription_period(object)),
        last_event_at: Some(ctx.at),
        ..Default::default()
    };
    Ok(Transition { update, history })
}

fn subscription_deleted(profile: &SubscriptionProfile, ctx: &EventContext<'_>) -> Transition {
    let update = SubscriptionUpdate {
        plan: Some(PlanTier::Free),
        status: Some(SubscriptionStatus::Cancelled),
        external_subscription_id: Some(None),
        last_event_at: Some(ctx.at),
        ..Default::default()
    };
    let history = ctx.history(
        profile.user_id,
        PlanTier::Free,
        SubscriptionStatus::Cancelled,
        0,
        None,
    );
    Transition { update, history }
}

fn invoice_paid(profile: &SubscriptionProfile, object: &Value, ctx: &EventContext<'_>) -> Transition {
    let update = SubscriptionUpdate {
        status: Some(SubscriptionStatus::Active),
        usage_reset_at: Some(ctx.at),
        last_event_at: Some(ctx.at),
        ..Default::default()
    };
    let history = ctx.history(
        profile.user_id,
        profile.plan,
        SubscriptionStatus::Active,
        extract_i64(object, &["amount_paid"]).unwrap_or(0),
        extract_str(object, &["currency"]),
    );
    Transition { update, history }
}

fn invoice_failed(profile: &SubscriptionProfile, object: &Value, ctx: &EventContext<'_>) -> Transition {
    let update = SubscriptionUpdate {
        status: Some(SubscriptionStatus::PastDue),
        last_event_at: Some(ctx.at),
        ..Default::default()
    };
    let history = ctx.history(
        profile.user_id,
        profile.plan,
        SubscriptionStatus::PastDue,
        extract_i64(object, &["amount_due"]).unwrap_or(0),
        extract_str(object, &["currency"]),
    );
    Transition { update, history }
}

/// Transition for an admin-triggered resync from the provider's current view.
/// No active subscription means the profile falls back to the free plan.
pub fn resync_transition(
    profile: &SubscriptionProfile,
    subscription: Option<&ProviderSubscription>,
    at: OffsetDateTime,
) -> Transition {
    let ctx = EventContext {
        id: "",
        event_type: "admin.resync",
        at,
    };
    let (update, plan, status) = match subscription {
        Some(sub) => {
            let status = SubscriptionStatus::from_provider(&sub.status);
            let update = SubscriptionUpdate {
                plan: sub.plan,
                status: Some(status.clone()),
                external_subscription_id: Some(Some(sub.id.clone())),
                billing_period: Some(BillingPeriod {
                    start: sub.current_period_start,
                    end: sub.current_period_end,
                }),
                last_event_at: Some(at),
                ..Default::default()
            };
            (update, sub.plan.unwrap_or(profile.plan), status)
        }
        None => (
            SubscriptionUpdate {
                plan: Some(PlanTier::Free),
                status: Some(SubscriptionStatus::Cancelled),
                external_subscription_id: Some(None),
                billing_period: Some(BillingPeriod {
                    start: None,
                    end: None,
                }),
                last_event_at: Some(at),
                ..Default::default()
            },
            PlanTier::Free,
            SubscriptionStatus::Cancelled,
        ),
    };
    let mut history = ctx.history(profile.user_id, plan, status, 0, None);
    history.event_id = None;
    Transition { update, history }
}

#[derive(Clone)]
pub struct SubscriptionReconciler {
    repo: Arc<dyn SubscriptionRepository>,
}

impl SubscriptionReconciler {
    pub fn new(repo: Arc<dyn SubscriptionRepository>) -> Self {
        Self { repo }
    }

    pub async fn reconcile(&self, event: &StripeEvent) -> Result<ReconcileOutcome, ReconcileError> {
        let event_type = event.event_type.as_str();
        let Some(kind) = BillingEvent::from_type(event_type) else {
            info!(event_type, event_id = %event.id, "unhandled stripe event acknowledged");
            return Ok(ReconcileOutcome::Ignored {
                event_type: event_type.to_string(),
            });
        };

        let Some(object) = jget(&event.payload, &["data", "object"]) else {
            return Ok(self.invalid(event, "event has no data.object"));
        };
        let ctx = EventContext {
            id: &event.id,
            event_type,
            at: event_time(event),
        };

        if kind == BillingEvent::CheckoutCompleted {
            return self.apply_checkout(object, &ctx).await;
        }

        let customer_id = extract_str(object, &["customer"]).map(str::to_string);
        let profile = match customer_id.as_deref() {
            Some(customer_id) => self.repo.find_profile_by_customer_id(customer_id).await?,
            None => None,
        };
        let Some(profile) = profile else {
            return Ok(self.orphaned(event, customer_id));
        };
        if profile.is_stale(ctx.at) {
            return Ok(self.stale(event, profile.user_id));
        }

        let transition = match kind {
            BillingEvent::SubscriptionUpserted => match subscription_upserted(&profile, object, &ctx) {
                Ok(t) => t,
                Err(reason) => return Ok(self.invalid(event, &reason)),
            },
            BillingEvent::SubscriptionDeleted => subscription_deleted(&profile, &ctx),
            BillingEvent::InvoicePaid => invoice_paid(&profile, object, &ctx),
            BillingEvent::InvoiceFailed => invoice_failed(&profile, object, &ctx),
            BillingEvent::CheckoutCompleted => checkout_completed(&profile, profile.plan, object, &ctx),
        };

        self.commit(event, kind, profile.user_id, transition).await
    }

    async fn apply_checkout(
        &self,
        object: &Value,
        ctx: &EventContext<'_>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(user_id) = checkout_user_id(object) else {
            return Ok(self.invalid_ctx(ctx, "checkout session has no userId metadata"));
        };
        let Some(plan_id) = metadata_plan_id(object) else {
            return Ok(self.invalid_ctx(ctx, "checkout session has no planId metadata"));
        };
        let Some(plan) = get_plan(plan_id) else {
            return Ok(self.invalid_ctx(ctx, &format!("unknown plan `{plan_id}`")));
        };

        let Some(profile) = self.repo.find_profile(user_id).await? else {
            error!(
                orphaned_event = true,
                event_id = ctx.id,
                event_type = ctx.event_type,
                %user_id,
                "checkout completed for unknown user"
            );
            return Ok(ReconcileOutcome::Orphaned { customer_id: None });
        };
        if profile.is_stale(ctx.at) {
            warn!(event_id = ctx.id, %user_id, "discarding stale checkout completion");
            return Ok(ReconcileOutcome::Stale { user_id });
        }

        if let Some(customer_id) = extract_str(object, &["customer"]) {
            if self
                .repo
                .set_external_customer_id_if_absent(user_id, customer_id)
                .await?
            {
                info!(%user_id, customer_id, "attached stripe customer on checkout completion");
            }
        }

        let transition = checkout_completed(&profile, plan.id, object, ctx);
        let applied = self
            .repo
            .apply_transition(user_id, &transition.update, Some(&transition.history))
            .await?;
        if !applied {
            warn!(event_id = ctx.id, %user_id, "checkout completion lost to a newer event");
            return Ok(ReconcileOutcome::Stale { user_id });
        }

        info!(event_id = ctx.id, %user_id, plan = plan.id.as_str(), "checkout completed");
        Ok(ReconcileOutcome::Applied {
            user_id,
            transition: BillingEvent::CheckoutCompleted.transition(),
        })
    }

    async fn commit(
        &self,
        event: &StripeEvent,
        kind: BillingEvent,
        user_id: Uuid,
        transition: Transition,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let applied = self
            .repo
            .apply_transition(user_id, &transition.update, Some(&transition.history))
            .await?;
        if !applied {
            return Ok(self.stale(event, user_id));
        }

        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            %user_id,
            transition = kind.transition(),
            status = ?transition.update.status.as_ref().map(|s| s.as_str()),
            "subscription reconciled"
        );
        Ok(ReconcileOutcome::Applied {
            user_id,
            transition: kind.transition(),
        })
    }

    /// Applies the provider's current view of a customer, bypassing the event stream.
    ///
    /// The watermark is stamped no earlier than the profile's own, so a provider
    /// clock ahead of ours cannot make the resync a silent no-op.
    pub async fn resync(
        &self,
        profile: &SubscriptionProfile,
        subscription: Option<&ProviderSubscription>,
    ) -> Result<SubscriptionProfile, ReconcileError> {
        let now = OffsetDateTime::now_utc();
        let at = profile.last_event_at.map_or(now, |last| last.max(now));
        let transition = resync_transition(profile, subscription, at);
        let applied = self
            .repo
            .apply_transition(profile.user_id, &transition.update, Some(&transition.history))
            .await?;
        if !applied {
            warn!(user_id = %profile.user_id, "resync lost to a newer write; nothing stored");
            return Err(ReconcileError::Superseded(profile.user_id));
        }

        let mut updated = profile.clone();
        transition.update.apply_to(&mut updated);
        info!(user_id = %profile.user_id, plan = updated.plan.as_str(), status = %updated.status, "subscription resynced");
        Ok(updated)
    }

    fn orphaned(&self, event: &StripeEvent, customer_id: Option<String>) -> ReconcileOutcome {
        error!(
            orphaned_event = true,
            event_id = %event.id,
            event_type = %event.event_type,
            customer_id = customer_id.as_deref().unwrap_or("<none>"),
            "no profile matches stripe customer; acknowledging"
        );
        ReconcileOutcome::Orphaned { customer_id }
    }

    fn stale(&self, event: &StripeEvent, user_id: Uuid) -> ReconcileOutcome {
        warn!(
            event_id = %event.id,
            event_type = %event.event_type,
            %user_id,
            "discarding event older than last reconciled state"
        );
        ReconcileOutcome::Stale { user_id }
    }

    fn invalid(&self, event: &StripeEvent, reason: &str) -> ReconcileOutcome {
        warn!(event_id = %event.id, event_type = %event.event_type, reason, "dropping unusable stripe event");
        ReconcileOutcome::Invalid {
            reason: reason.to_string(),
        }
    }

    fn invalid_ctx(&self, ctx: &EventContext<'_>, reason: &str) -> ReconcileOutcome {
        warn!(event_id = ctx.id, event_type = ctx.event_type, reason, "dropping unusable stripe event");
        ReconcileOutcome::Invalid {
            reason: reason.to_string(),
        }
    }
}
