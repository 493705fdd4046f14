//! HTTP payment gateway client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use domain::BankDetails;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};

use super::gateway::{PayeeProfile, PaymentGateway, TransferReceipt, TransferRequest};
use crate::error::{Result, SagaError};

/// Amount charged by the gateway to check an account, in paise.
const VALIDATION_AMOUNT_PAISE: i64 = 100;

/// Connection settings for [`HttpPaymentGateway`].
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub base_url: String,
    pub key_id: String,
    pub key_secret: String,
    /// Platform account money is paid out from.
    pub source_account: String,
    pub timeout: Duration,
}

impl HttpGatewayConfig {
    pub fn new(
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        source_account: impl Into<String>,
    ) -> Self {
        Self {
            base_url: "https://api.razorpay.com/v1".to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            source_account: source_account.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Validation {
    status: String,
}

#[derive(Debug, Deserialize)]
struct Payout {
    id: String,
    status: Option<String>,
    mode: Option<String>,
}

/// Payment gateway reached over HTTPS with basic auth.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    config: HttpGatewayConfig,
}

impl HttpPaymentGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SagaError::Gateway(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    async fn post<B, R>(&self, endpoint: &'static str, body: &B, idempotency_key: Option<&str>) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let start = Instant::now();
        let mut request = self
            .client
            .post(self.url(endpoint))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(body);
        if let Some(key) = idempotency_key {
            request = request.header("X-Payout-Idempotency", key);
        }

        let result = async {
            let response = request
                .send()
                .await
                .map_err(|e| SagaError::Gateway(format!("{endpoint}: {e}")))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SagaError::Gateway(error_description(
                    endpoint,
                    status.as_u16(),
                    &body,
                )));
            }
            response
                .json::<R>()
                .await
                .map_err(|e| SagaError::Gateway(format!("{endpoint}: invalid response: {e}")))
        }
        .await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!("gateway_requests_total", "endpoint" => endpoint, "outcome" => outcome)
            .increment(1);
        metrics::histogram!("gateway_request_duration_seconds", "endpoint" => endpoint)
            .record(start.elapsed().as_secs_f64());
        if let Err(ref e) = result {
            tracing::error!(endpoint, error = %e, "gateway_request_failed");
        }
        result
    }
}

fn contact_body(payee: &PayeeProfile) -> Value {
    json!({
        "name": payee.name.trim(),
        "email": payee.email.trim(),
        "contact": payee.phone,
        "type": "employee",
        "reference_id": payee.reference_id,
    })
}

fn fund_account_body(payee_id: &str, bank: &BankDetails) -> Value {
    json!({
        "contact_id": payee_id,
        "account_type": "bank_account",
        "bank_account": {
            "name": bank.account_holder_name.trim(),
            "ifsc": bank.ifsc.trim().to_uppercase(),
            "account_number": bank.account_number,
        },
    })
}

fn validation_body(source_account: &str, destination_id: &str) -> Value {
    json!({
        "account_number": source_account,
        "fund_account": { "id": destination_id },
        "amount": VALIDATION_AMOUNT_PAISE,
        "currency": "INR",
    })
}

fn payout_body(source_account: &str, request: &TransferRequest) -> Value {
    json!({
        "account_number": source_account,
        "fund_account_id": request.destination_id,
        "amount": request.amount.paise(),
        "currency": "INR",
        "mode": request.mode,
        "purpose": "payout",
        "queue_if_low_balance": true,
        "reference_id": request.reference,
    })
}

/// Pulls the gateway's error description out of a failed response.
fn error_description(endpoint: &str, status: u16, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        let error = v.get("error")?;
        error
            .get("description")
            .or_else(|| error.get("reason"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match detail {
        Some(detail) => format!("{endpoint} returned {status}: {detail}"),
        None => format!("{endpoint} returned {status}"),
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn register_payee(&self, payee: &PayeeProfile) -> Result<String> {
        let created: Created = self.post("contacts", &contact_body(payee), None).await?;
        Ok(created.id)
    }

    async fn register_destination(&self, payee_id: &str, bank: &BankDetails) -> Result<String> {
        let created: Created = self
            .post("fund_accounts", &fund_account_body(payee_id, bank), None)
            .await?;
        Ok(created.id)
    }

    async fn validate_destination(&self, destination_id: &str) -> Result<String> {
        let body = validation_body(&self.config.source_account, destination_id);
        let validation: Validation = self.post("fund_accounts/validations", &body, None).await?;
        Ok(validation.status)
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt> {
        let body = payout_body(&self.config.source_account, request);
        let payout: Payout = self
            .post("payouts", &body, Some(&request.reference))
            .await?;
        Ok(TransferReceipt {
            transfer_id: payout.id,
            status: payout.status.unwrap_or_else(|| "processing".to_string()),
            mode: payout.mode.unwrap_or_else(|| request.mode.clone()),
        })
    }
}
