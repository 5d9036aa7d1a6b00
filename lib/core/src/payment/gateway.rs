use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

use super::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, RequestBody};
use crate::clock::Clock;
use crate::error::PaymentError;
use crate::models::{
    AppLinks, CreatePaymentRequest, PaymentOutcome, PaymentSession, PaymentStatus,
    PaymentStatusCheck, PollPolicy, ProviderConfig,
};

/// Token lifetime assumed when the provider does not send `expires_in`
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// ISO-8601 duration after which an unpaid payment expires
const PAYMENT_EXPIRES_IN: &str = "PT9M";

struct AuthToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MonetaryValue {
    amount: String,
    currency: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentPayload {
    monetary_value: MonetaryValue,
    description: String,
    expires_in: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentResponse {
    payment_id: String,
    #[serde(default)]
    readable_code: String,
    #[serde(default)]
    personal_app_link: String,
    #[serde(default)]
    business_app_link: String,
    #[serde(default)]
    corporate_app_link: String,
    #[serde(default)]
    qr_code: String,
    #[serde(default)]
    valid_until: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

/// Client for the payment provider's REST API
///
/// Holds the bearer token for its own lifetime and nothing else: payment
/// sessions belong to the caller.
pub struct PaymentGateway {
    config: ProviderConfig,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    token: Mutex<Option<AuthToken>>,
}

impl PaymentGateway {
    pub fn new(
        config: ProviderConfig,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            transport,
            clock,
            token: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Returns a valid bearer token, exchanging client credentials when the
    /// cached one is missing or expired
    ///
    /// Concurrent callers that both find the token expired will both refresh.
    pub async fn get_auth_token(&self) -> Result<String, PaymentError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        debug!("Requesting payment provider token");
        let response = self
            .transport
            .send(HttpRequest {
                method: HttpMethod::Post,
                url: self.url(&self.config.token_path),
                bearer_token: None,
                body: RequestBody::Form(vec![
                    ("grant_type".to_string(), "client_credentials".to_string()),
                    ("client_id".to_string(), self.config.client_id.clone()),
                    ("client_secret".to_string(), self.config.client_secret.clone()),
                ]),
            })
            .await?;

        if !response.is_success() {
            error!(
                "Payment provider authentication failed: {} {}",
                response.status, response.body
            );
            return Err(PaymentError::Authentication {
                status: response.status,
                body: response.body,
            });
        }

        let token: TokenResponse = decode(&response)?;
        let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let expires_at = i64::try_from(lifetime)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|duration| self.clock.now().checked_add_signed(duration))
            .ok_or_else(|| {
                PaymentError::InvalidResponse(format!("Token lifetime out of range: {lifetime}"))
            })?;
        info!("Obtained payment provider token valid until {expires_at}");

        let mut cached = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        *cached = Some(AuthToken {
            value: token.access_token.clone(),
            expires_at,
        });

        Ok(token.access_token)
    }

    /// Creates a payment request for the registration fee
    ///
    /// Amount and description fall back to the configured defaults.
    pub async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<PaymentSession, PaymentError> {
        let token = self.get_auth_token().await?;
        let amount: Decimal = request.amount.unwrap_or(self.config.amount);
        let payload = CreatePaymentPayload {
            monetary_value: MonetaryValue {
                amount: amount.normalize().to_string(),
                currency: self.config.currency.clone(),
            },
            description: request
                .description
                .unwrap_or_else(|| self.config.description.clone()),
            expires_in: PAYMENT_EXPIRES_IN,
        };
        let body = serde_json::to_value(&payload)
            .map_err(|e| PaymentError::InvalidResponse(e.to_string()))?;

        let response = self
            .transport
            .send(HttpRequest {
                method: HttpMethod::Post,
                url: self.url(&self.config.payments_path),
                bearer_token: Some(token),
                body: RequestBody::Json(body),
            })
            .await?;

        if !response.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&response.body)
                .ok()
                .and_then(|body| body.get("message")?.as_str().map(str::to_string))
                .unwrap_or_else(|| format!("Payment creation failed: {}", response.status));
            error!(
                "Payment creation failed: {} {}",
                response.status, response.body
            );
            return Err(PaymentError::PaymentCreation {
                status: response.status,
                message,
            });
        }

        let created: CreatePaymentResponse = decode(&response)?;
        info!("Payment created: {}", created.payment_id);

        Ok(PaymentSession {
            payment_id: created.payment_id,
            status: PaymentStatus::Created,
            readable_code: created.readable_code,
            app_links: AppLinks {
                personal: created.personal_app_link,
                business: created.business_app_link,
                corporate: created.corporate_app_link,
            },
            qr_code: created.qr_code,
            valid_until: created.valid_until,
        })
    }

    pub async fn check_payment_status(
        &self,
        payment_id: &str,
    ) -> Result<PaymentStatusCheck, PaymentError> {
        let token = self.get_auth_token().await?;
        let response = self
            .transport
            .send(HttpRequest {
                method: HttpMethod::Get,
                url: self.payment_url(payment_id, "status"),
                bearer_token: Some(token),
                body: RequestBody::Empty,
            })
            .await?;

        if !response.is_success() {
            return Err(PaymentError::StatusCheck {
                status: response.status,
            });
        }

        let status: StatusResponse = decode(&response)?;
        Ok(PaymentStatusCheck::new(status.status))
    }

    /// Cancels a pending payment
    ///
    /// The provider may answer with an empty body, reported as `{"success": true}`.
    pub async fn cancel_payment(
        &self,
        payment_id: &str,
    ) -> Result<serde_json::Value, PaymentError> {
        let token = self.get_auth_token().await?;
        let response = self
            .transport
            .send(HttpRequest {
                method: HttpMethod::Post,
                url: self.payment_url(payment_id, "cancel"),
                bearer_token: Some(token),
                body: RequestBody::Empty,
            })
            .await?;

        if !response.is_success() {
            return Err(PaymentError::Cancellation {
                status: response.status,
            });
        }

        info!("Payment cancelled: {payment_id}");
        if response.body.trim().is_empty() {
            return Ok(json!({ "success": true }));
        }
        decode(&response)
    }

    /// Polls the payment status until it is paid, fails, or `policy` runs out
    ///
    /// Failed status checks are retried. When `cancel` fires, polling stops
    /// at the next pause with `PaymentError::Cancelled`; a dropped sender
    /// counts as a cancellation too.
    pub async fn wait_for_payment(
        &self,
        payment_id: &str,
        policy: PollPolicy,
        mut cancel: Option<watch::Receiver<()>>,
    ) -> Result<PaymentOutcome, PaymentError> {
        for attempt in 1..=policy.max_attempts {
            match self.check_payment_status(payment_id).await {
                Ok(status) if status.paid => {
                    info!("Payment {payment_id} paid after {attempt} checks");
                    return Ok(PaymentOutcome {
                        success: true,
                        status,
                        reason: None,
                    });
                }
                Ok(status) if status.state().is_failure() => {
                    info!("Payment {payment_id} ended as {}", status.status);
                    return Ok(PaymentOutcome {
                        success: false,
                        reason: Some(status.status.clone()),
                        status,
                    });
                }
                Ok(status) => {
                    debug!(
                        "Payment {payment_id} is {} ({attempt}/{})",
                        status.status, policy.max_attempts
                    );
                }
                Err(e) => {
                    warn!("Payment check failed for {payment_id}: {e}");
                    if attempt == policy.max_attempts {
                        break;
                    }
                }
            }

            if attempt < policy.max_attempts {
                pause(policy.interval, &mut cancel).await?;
            }
        }

        error!("Payment verification timeout for {payment_id}");
        Err(PaymentError::VerificationTimeout {
            attempts: policy.max_attempts,
        })
    }

    fn cached_token(&self) -> Option<String> {
        let now = self.clock.now();
        let cached = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        cached
            .as_ref()
            .filter(|token| now < token.expires_at)
            .map(|token| token.value.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn payment_url(&self, payment_id: &str, action: &str) -> String {
        self.url(&format!("{}/{payment_id}/{action}", self.config.payments_path))
    }
}

async fn pause(
    interval: Duration,
    cancel: &mut Option<watch::Receiver<()>>,
) -> Result<(), PaymentError> {
    let Some(cancel) = cancel.as_mut() else {
        tokio::time::sleep(interval).await;
        return Ok(());
    };

    tokio::select! {
        biased;
        _ = cancel.changed() => {
            info!("Payment polling cancelled");
            Err(PaymentError::Cancelled)
        }
        _ = tokio::time::sleep(interval) => Ok(()),
    }
}

fn decode<T: serde::de::DeserializeOwned>(response: &HttpResponse) -> Result<T, PaymentError> {
    serde_json::from_str(&response.body).map_err(|e| PaymentError::InvalidResponse(e.to_string()))
}
