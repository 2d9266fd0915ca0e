//! Email CRM proxy
//!
//! Adds landing-page leads to the marketing list and moves them through the
//! lead statuses as they show more intent. The CRM API key never leaves the
//! server.

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::CrmConfig;
use crate::time;
use crate::tracking::{is_valid_email, mask_email};

#[derive(Error, Debug)]
pub enum CrmError {
    #[error("Email is required")]
    MissingEmail,

    #[error("Invalid email format")]
    InvalidEmail,

    #[error("CRM API key is not configured")]
    NotConfigured,

    /// The CRM refused the request; the message is the CRM's own
    #[error("{0}")]
    Rejected(String),

    #[error("Subscription service unavailable (status {status})")]
    Unavailable { status: u16 },

    #[error("Service temporarily unavailable")]
    Timeout,

    #[error("Network error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for CrmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CrmError::Timeout
        } else {
            CrmError::Transport(e.to_string())
        }
    }
}

/// Lead lifecycle status stored on the contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContactStatus {
    Lead,
    #[default]
    #[serde(rename = "Hot_Lead")]
    HotLead,
    Clicker,
    Subscriber,
}

impl ContactStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ContactStatus::Lead => "Lead",
            ContactStatus::HotLead => "Hot_Lead",
            ContactStatus::Clicker => "Clicker",
            ContactStatus::Subscriber => "Subscriber",
        }
    }
}

impl FromStr for ContactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Lead" => Ok(ContactStatus::Lead),
            "Hot_Lead" => Ok(ContactStatus::HotLead),
            "Clicker" => Ok(ContactStatus::Clicker),
            "Subscriber" => Ok(ContactStatus::Subscriber),
            other => Err(format!("unknown contact status: {}", other)),
        }
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed,
    /// Contact already existed and was updated in place
    ContactUpdated,
}

impl SubscribeOutcome {
    pub fn message(self) -> &'static str {
        match self {
            SubscribeOutcome::Subscribed => "User subscribed",
            SubscribeOutcome::ContactUpdated => "Contact updated",
        }
    }
}

/// Trimmed, lowercased and validated email
pub fn normalize_email(raw: &str) -> Result<String, CrmError> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(CrmError::MissingEmail);
    }
    if !is_valid_email(&email) {
        return Err(CrmError::InvalidEmail);
    }
    Ok(email)
}

/// Contact creation body
pub fn subscribe_payload(
    email: &str,
    source: &str,
    config: &CrmConfig,
    at: DateTime<Utc>,
) -> Value {
    json!({
        "email": email,
        "attributes": {
            "SOURCE": source.to_uppercase(),
            "STATUS": ContactStatus::Lead.as_str(),
            "INTEREST": config.interest,
            "SIGNUP_DATE": at.format("%Y-%m-%d").to_string(),
            "SIGNUP_TIME": at.format("%H:%M:%S").to_string(),
        },
        "listIds": [config.list_id],
        "updateEnabled": true,
    })
}

/// Interpret the CRM's answer to a contact creation
pub fn classify_subscribe_response(status: u16, body: &str) -> Result<SubscribeOutcome, CrmError> {
    match status {
        200 | 201 | 204 => Ok(SubscribeOutcome::Subscribed),
        400 => {
            let detail: Value = serde_json::from_str(body).unwrap_or(Value::Null);
            if detail.get("code").and_then(Value::as_str) == Some("duplicate_parameter") {
                return Ok(SubscribeOutcome::ContactUpdated);
            }
            let message = detail
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Subscription failed");
            Err(CrmError::Rejected(message.to_string()))
        }
        other => Err(CrmError::Unavailable { status: other }),
    }
}

pub struct CrmClient {
    http_client: Client,
    config: CrmConfig,
}

impl CrmClient {
    pub fn new(config: CrmConfig) -> Result<Self, CrmError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str, CrmError> {
        self.config.api_key.as_deref().ok_or(CrmError::NotConfigured)
    }

    pub async fn subscribe(&self, email: &str, source: &str) -> Result<SubscribeOutcome, CrmError> {
        let email = normalize_email(email)?;
        let api_key = self.api_key()?;
        let payload = subscribe_payload(&email, source, &self.config, time::now());

        info!(email = %mask_email(&email), source, "Subscribing contact");

        let response = self
            .http_client
            .post(&self.config.contacts_url)
            .header("api-key", api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!("CRM request failed: {}", e);
                CrmError::from(e)
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let outcome = classify_subscribe_response(status, &body);
        match &outcome {
            Ok(SubscribeOutcome::Subscribed) => info!(email = %mask_email(&email), "Contact subscribed"),
            Ok(SubscribeOutcome::ContactUpdated) => {
                info!(email = %mask_email(&email), "Contact already exists, updated")
            }
            Err(CrmError::Rejected(message)) => warn!("CRM rejected contact: {}", message),
            Err(_) => error!(status, "CRM API error: {}", body),
        }
        outcome
    }

    pub async fn update_status(&self, email: &str, status: ContactStatus) -> Result<(), CrmError> {
        let email = normalize_email(email)?;
        let api_key = self.api_key()?;

        let mut url = self.config.contacts_url.trim_end_matches('/').to_string();
        url.push('/');
        url.push_str(&url::form_urlencoded::byte_serialize(email.as_bytes()).collect::<String>());

        let payload = json!({
            "attributes": {
                "STATUS": status.as_str(),
                "LAST_ACTION_DATE": time::now().format("%Y-%m-%d").to_string(),
            }
        });

        let response = self
            .http_client
            .put(url)
            .header("api-key", api_key)
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => {
                info!(email = %mask_email(&email), status = %status, "Contact status updated");
                Ok(())
            }
            other => {
                warn!(email = %mask_email(&email), status = other.as_u16(), "Contact status update failed");
                Err(CrmError::Rejected("Failed to update contact".to_string()))
            }
        }
    }
}
