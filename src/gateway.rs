//! Payment-gateway boundary: hosted checkout sessions created with course and
//! buyer metadata, later re-read by id to confirm payment.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

const API_BASE: &str = "https://api.stripe.com";

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway responded with {status}: {message}")]
    Api { status: u16, message: String },
}

/// Metadata attached at session creation and read back during verification.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct SessionMetadata {
    #[serde(rename = "courseId", default)]
    pub course_id: Option<String>,
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
    #[serde(rename = "courseTitle", default)]
    pub course_title: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewCheckoutSession {
    pub product_name: String,
    pub product_description: String,
    pub product_image: Option<String>,
    /// Minor currency units (cents); currency is fixed to USD.
    pub unit_amount: i64,
    pub client_reference_id: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: SessionMetadata,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    pub payment_status: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(
        &self,
        session: NewCheckoutSession,
    ) -> Result<CheckoutSession, GatewayError>;

    /// `Ok(None)` when the gateway does not know the session id.
    async fn retrieve_session(
        &self,
        session_id: &str,
    ) -> Result<Option<CheckoutSession>, GatewayError>;
}

pub struct StripeGateway {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl StripeGateway {
    pub fn new(secret_key: String) -> Result<Self, GatewayError> {
        // Short-lived invocations hit connection-reuse failures against the
        // gateway, so keep-alive stays off and requests time out at 20s.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self {
            http,
            secret_key,
            api_base: API_BASE.to_string(),
        })
    }

    async fn parse_session(
        response: reqwest::Response,
    ) -> Result<CheckoutSession, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or_default();
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown gateway error")
                .to_string();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_session(
        &self,
        session: NewCheckoutSession,
    ) -> Result<CheckoutSession, GatewayError> {
        let mut params: Vec<(&str, String)> = vec![
            ("mode", "payment".to_string()),
            ("payment_method_types[0]", "card".to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", "usd".to_string()),
            (
                "line_items[0][price_data][unit_amount]",
                session.unit_amount.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                session.product_name,
            ),
            (
                "line_items[0][price_data][product_data][description]",
                session.product_description,
            ),
            ("client_reference_id", session.client_reference_id),
            ("success_url", session.success_url),
            ("cancel_url", session.cancel_url),
        ];
        if let Some(image) = session.product_image {
            params.push(("line_items[0][price_data][product_data][images][0]", image));
        }
        if let Some(course_id) = session.metadata.course_id {
            params.push(("metadata[courseId]", course_id));
        }
        if let Some(user_id) = session.metadata.user_id {
            params.push(("metadata[userId]", user_id));
        }
        if let Some(course_title) = session.metadata.course_title {
            params.push(("metadata[courseTitle]", course_title));
        }

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&params)
            .send()
            .await?;
        Self::parse_session(response).await
    }

    async fn retrieve_session(
        &self,
        session_id: &str,
    ) -> Result<Option<CheckoutSession>, GatewayError> {
        let response = self
            .http
            .get(format!("{}/v1/checkout/sessions/{}", self.api_base, session_id))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::parse_session(response).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_session_with_metadata() {
        let session: CheckoutSession = serde_json::from_value(json!({
            "id": "cs_test_1",
            "url": "https://checkout.example/cs_test_1",
            "payment_status": "paid",
            "payment_intent": "pi_1",
            "amount_total": 4999,
            "metadata": {"courseId": "c1", "userId": "u1", "courseTitle": "Rust 101"}
        }))
        .unwrap();

        assert!(session.is_paid());
        assert_eq!(session.metadata.course_id.as_deref(), Some("c1"));
        assert_eq!(session.amount_total, Some(4999));
    }

    #[test]
    fn tolerates_sparse_session_payloads() {
        let session: CheckoutSession = serde_json::from_value(json!({
            "id": "cs_test_2",
            "payment_status": "unpaid"
        }))
        .unwrap();

        assert!(!session.is_paid());
        assert!(session.metadata.user_id.is_none());
        assert!(session.amount_total.is_none());
    }
}
