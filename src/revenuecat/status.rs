use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    None,
    Trial,
    Active,
    Grace,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::None => "none",
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Grace => "grace",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "trial" => SubscriptionStatus::Trial,
            "active" => SubscriptionStatus::Active,
            "grace" => SubscriptionStatus::Grace,
            "expired" => SubscriptionStatus::Expired,
            _ => SubscriptionStatus::None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SubscriptionStatus::None => "Gratuit",
            SubscriptionStatus::Trial => "Essai en cours",
            SubscriptionStatus::Active => "Premium actif",
            SubscriptionStatus::Grace => "Période de grâce",
            SubscriptionStatus::Expired => "Abonnement expiré",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriberStatus {
    pub status: SubscriptionStatus,
    pub is_active: bool,
    pub is_trial: bool,
    pub is_sandbox: bool,
    pub product_identifier: Option<String>,
    pub period_type: Option<String>,
    pub store: Option<String>,
    pub will_renew: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub purchase_date: Option<DateTime<Utc>>,
    pub grace_period_expires_at: Option<DateTime<Utc>>,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
}

impl SubscriberStatus {
    fn free(subscriber: &Value) -> Self {
        Self {
            status: SubscriptionStatus::None,
            is_active: false,
            is_trial: false,
            is_sandbox: false,
            product_identifier: None,
            period_type: None,
            store: None,
            will_renew: false,
            expires_at: None,
            purchase_date: None,
            grace_period_expires_at: None,
            first_seen: str_field(subscriber, "first_seen"),
            last_seen: str_field(subscriber, "last_seen"),
        }
    }

    pub fn label(&self) -> &'static str {
        self.status.label()
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn date_field(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Picks the active subscription expiring last, else the most recently
/// expired one, and derives the subscriber's status from it.
pub fn parse_subscriber_status(subscriber: &Value, now: DateTime<Utc>) -> SubscriberStatus {
    let mut result = SubscriberStatus::free(subscriber);
    let Some(subscriptions) = subscriber.get("subscriptions").and_then(Value::as_object) else {
        return result;
    };

    let with_expiry: Vec<(&String, &Value, Option<DateTime<Utc>>)> = subscriptions
        .iter()
        .filter(|(_, sub)| sub.get("expires_date").and_then(Value::as_str).is_some())
        .map(|(product, sub)| (product, sub, date_field(sub, "expires_date")))
        .collect();

    let best_active = with_expiry
        .iter()
        .filter(|(_, _, exp)| exp.is_some_and(|e| e > now))
        .max_by_key(|(_, _, exp)| *exp);
    let best = best_active.or_else(|| {
        with_expiry
            .iter()
            .max_by_key(|(_, _, exp)| exp.unwrap_or(DateTime::<Utc>::MIN_UTC))
    });
    let Some((product, sub, _)) = best else {
        return result;
    };

    result.product_identifier = Some((*product).clone());
    result.period_type = str_field(sub, "period_type");
    result.is_sandbox = sub.get("is_sandbox").and_then(Value::as_bool).unwrap_or(false);
    result.store = str_field(sub, "store");
    result.will_renew = sub
        .get("unsubscribe_detected_at")
        .map(Value::is_null)
        .unwrap_or(true);
    result.expires_at = date_field(sub, "expires_date");
    result.purchase_date = date_field(sub, "purchase_date");
    result.grace_period_expires_at = date_field(sub, "grace_period_expires_date");

    if result.expires_at.is_some_and(|e| e > now) {
        result.is_active = true;
        if result.period_type.as_deref() == Some("trial") {
            result.is_trial = true;
            result.status = SubscriptionStatus::Trial;
        } else {
            result.status = SubscriptionStatus::Active;
        }
    } else if result.grace_period_expires_at.is_some_and(|g| g > now) {
        result.is_active = true;
        result.status = SubscriptionStatus::Grace;
    } else {
        result.status = SubscriptionStatus::Expired;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn no_subscriptions_is_free() {
        let status = parse_subscriber_status(&json!({"first_seen": "2024-01-01"}), now());
        assert_eq!(status.status, SubscriptionStatus::None);
        assert_eq!(status.label(), "Gratuit");
        assert_eq!(status.first_seen.as_deref(), Some("2024-01-01"));
    }

    #[test]
    fn latest_active_subscription_wins() {
        let subscriber = json!({ "subscriptions": {
            "monthly": { "expires_date": "2025-06-10T00:00:00Z", "period_type": "normal" },
            "yearly": { "expires_date": "2026-01-01T00:00:00Z", "period_type": "trial",
                        "unsubscribe_detected_at": "2025-05-30T00:00:00Z", "store": "app_store" },
            "old": { "expires_date": "2024-01-01T00:00:00Z" }
        }});
        let status = parse_subscriber_status(&subscriber, now());
        assert_eq!(status.product_identifier.as_deref(), Some("yearly"));
        assert_eq!(status.status, SubscriptionStatus::Trial);
        assert!(status.is_active && status.is_trial);
        assert!(!status.will_renew);
        assert_eq!(status.store.as_deref(), Some("app_store"));
    }

    #[test]
    fn expired_subscription_in_grace_period() {
        let subscriber = json!({ "subscriptions": {
            "monthly": {
                "expires_date": "2025-05-30T00:00:00Z",
                "grace_period_expires_date": "2025-06-05T00:00:00Z",
                "unsubscribe_detected_at": null
            }
        }});
        let status = parse_subscriber_status(&subscriber, now());
        assert_eq!(status.status, SubscriptionStatus::Grace);
        assert!(status.is_active);
        assert!(status.will_renew);
    }

    #[test]
    fn most_recent_expired_is_reported() {
        let subscriber = json!({ "subscriptions": {
            "a": { "expires_date": "2024-01-01T00:00:00Z" },
            "b": { "expires_date": "2025-01-01T00:00:00Z", "is_sandbox": true }
        }});
        let status = parse_subscriber_status(&subscriber, now());
        assert_eq!(status.product_identifier.as_deref(), Some("b"));
        assert_eq!(status.status, SubscriptionStatus::Expired);
        assert_eq!(status.label(), "Abonnement expiré");
        assert!(status.is_sandbox);
    }
}
