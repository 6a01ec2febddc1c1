//! Stripe REST client
//!
//! Implements [`BillingProvider`] with form-encoded requests against the Stripe
//! API, authenticated with a secret key as bearer token. Every create call
//! carries an `Idempotency-Key` header so retries never duplicate objects.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::error::ProviderError;
use crate::provider::BillingProvider;
use crate::store::Account;

/// Default Stripe API endpoint
pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// Stripe API client
#[derive(Debug, Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_key: String,
    api_base: Url,
}

/// Any created Stripe object; only the id is needed
#[derive(Debug, Deserialize)]
struct CreatedObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl StripeClient {
    /// Create a client with a request timeout
    pub fn new(
        api_key: impl Into<String>,
        api_base: Url,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            api_base,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base.as_str().trim_end_matches('/'), path)
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, String)],
        idempotency_key: &str,
    ) -> Result<CreatedObject, ProviderError> {
        let response = self
            .http
            .post(self.endpoint(path))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", idempotency_key)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorEnvelope>().await {
                Ok(envelope) => envelope
                    .error
                    .message
                    .or(envelope.error.kind)
                    .unwrap_or_else(|| "unknown error".to_string()),
                Err(_) => status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string(),
            };
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<CreatedObject>().await?)
    }
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn create_customer(
        &self,
        account: &Account,
        idempotency_key: &str,
    ) -> Result<String, ProviderError> {
        let mut form = vec![
            ("name", account.name.clone()),
            ("metadata[account_id]", account.id.to_string()),
        ];
        if let Some(email) = &account.billing_email {
            form.push(("email", email.clone()));
        }

        let customer = self
            .post_form("customers", &form, idempotency_key)
            .await?;
        tracing::info!(
            account_id = %account.id,
            customer_id = %customer.id,
            "Created Stripe customer"
        );
        Ok(customer.id)
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        quantity: u32,
        idempotency_key: &str,
    ) -> Result<String, ProviderError> {
        let form = [
            ("customer", customer_id.to_string()),
            ("items[0][price]", price_id.to_string()),
            ("items[0][quantity]", quantity.to_string()),
        ];

        let subscription = self
            .post_form("subscriptions", &form, idempotency_key)
            .await?;
        tracing::info!(
            customer_id,
            subscription_id = %subscription.id,
            price_id,
            "Created Stripe subscription"
        );
        Ok(subscription.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> StripeClient {
        StripeClient::new(
            "sk_test_123",
            Url::parse(&server.base_url()).unwrap(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_customer() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/customers")
                    .header("authorization", "Bearer sk_test_123")
                    .header("idempotency-key", "reprovision:acct:cus_old:customer")
                    .body_contains("name=Acme")
                    .body_contains("email=billing%40acme.test");
                then.status(200)
                    .json_body(json!({"id": "cus_new", "object": "customer"}));
            })
            .await;

        let account = Account::new("Acme").with_billing_email("billing@acme.test");
        let customer_id = client(&server)
            .create_customer(&account, "reprovision:acct:cus_old:customer")
            .await
            .unwrap();

        assert_eq!(customer_id, "cus_new");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_subscription() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/subscriptions")
                    .header("idempotency-key", "sub_key")
                    .body_contains("customer=cus_new")
                    .body_contains("items%5B0%5D%5Bquantity%5D=2");
                then.status(200).json_body(json!({"id": "sub_1"}));
            })
            .await;

        let id = client(&server)
            .create_subscription("cus_new", "price_1", 2, "sub_key")
            .await
            .unwrap();

        assert_eq!(id, "sub_1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_is_surfaced() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/customers");
                then.status(402).json_body(json!({
                    "error": {"type": "card_error", "message": "Your card was declined."}
                }));
            })
            .await;

        let err = client(&server)
            .create_customer(&Account::new("Acme"), "key_1")
            .await
            .unwrap_err();

        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 402);
                assert_eq!(message, "Your card was declined.");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
