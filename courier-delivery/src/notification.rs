//! Typed notification requests for the built-in templates.
//!
//! Each request names one recipient and the fields its template needs, and
//! converts into a [`SendRequest`] for that template.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{message::SendRequest, template::Substitutions};

/// A request that maps onto exactly one built-in template.
pub trait Notification: Into<SendRequest> {
    const TEMPLATE: &'static str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationCreatedRequest {
    pub recipient: String,
    pub application_id: String,
    pub service_name: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationApprovedRequest {
    pub recipient: String,
    pub application_id: String,
    pub service_name: String,
    pub amount: f64,
    pub payment_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRejectedRequest {
    pub recipient: String,
    pub application_id: String,
    pub service_name: String,
    pub amount: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDeletedRequest {
    pub recipient: String,
    pub application_id: String,
    pub service_name: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCreatedRequest {
    pub recipient: String,
    pub payment_id: String,
    pub service_name: String,
    pub amount: f64,
    /// Free-form date, shown as given.
    #[serde(default)]
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSuccessRequest {
    pub recipient: String,
    pub payment_id: String,
    pub service_name: String,
    pub amount: f64,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentFailedRequest {
    pub recipient: String,
    pub payment_id: String,
    pub service_name: String,
    pub amount: f64,
    pub reason: String,
}

/// Collects template fields, dropping absent optional ones.
struct Fields(Substitutions);

impl Fields {
    fn new(service_name: String, amount: f64) -> Self {
        let mut fields = Self(Substitutions::new());
        fields.0.insert("service_name".to_string(), Value::String(service_name));
        fields
            .0
            .insert("amount".to_string(), Value::String(format_amount(amount)));
        fields
    }

    fn with(mut self, key: &str, value: String) -> Self {
        self.0.insert(key.to_string(), Value::String(value));
        self
    }

    fn with_optional(self, key: &str, value: Option<String>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    fn into_request(self, template: &str, recipient: String) -> SendRequest {
        SendRequest {
            to: vec![recipient],
            template: Some(template.to_string()),
            substitutions: self.0,
            ..SendRequest::default()
        }
    }
}

/// Amounts are shown with two decimals.
fn format_amount(amount: f64) -> String {
    format!("{amount:.2}")
}

macro_rules! notification {
    ($request:ty, $template:literal, |$r:ident| $fields:expr) => {
        impl Notification for $request {
            const TEMPLATE: &'static str = $template;
        }

        impl From<$request> for SendRequest {
            fn from($r: $request) -> Self {
                let recipient = $r.recipient;
                $fields.into_request(<$request as Notification>::TEMPLATE, recipient)
            }
        }
    };
}

notification!(ApplicationCreatedRequest, "application_created", |r| {
    Fields::new(r.service_name, r.amount).with("application_id", r.application_id)
});

notification!(ApplicationApprovedRequest, "application_approved", |r| {
    Fields::new(r.service_name, r.amount)
        .with("application_id", r.application_id)
        .with("payment_id", r.payment_id)
});

notification!(ApplicationRejectedRequest, "application_rejected", |r| {
    Fields::new(r.service_name, r.amount)
        .with("application_id", r.application_id)
        .with("reason", r.reason)
});

notification!(ApplicationDeletedRequest, "application_deleted", |r| {
    Fields::new(r.service_name, r.amount).with("application_id", r.application_id)
});

notification!(PaymentCreatedRequest, "payment_created", |r| {
    Fields::new(r.service_name, r.amount)
        .with("payment_id", r.payment_id)
        .with_optional("due_date", r.due_date)
});

notification!(PaymentSuccessRequest, "payment_success", |r| {
    Fields::new(r.service_name, r.amount)
        .with("payment_id", r.payment_id)
        .with_optional("transaction_id", r.transaction_id)
});

notification!(PaymentFailedRequest, "payment_failed", |r| {
    Fields::new(r.service_name, r.amount)
        .with("payment_id", r.payment_id)
        .with("reason", r.reason)
});
