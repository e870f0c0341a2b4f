//! HTTP settlement counterparty client.
//!
//! Classification policy: request timeout -> `Timeout`; connection errors,
//! 429 and 5xx -> `Temporary`; every other failure (4xx, malformed body,
//! unclassifiable transport error) -> `Permanent`, fail-closed.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{SettlementApi, SettlementError, SettlementReceipt, SettlementTransfer};

pub struct HttpSettlementApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSettlementApi {
    pub fn new(base_url: String, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl SettlementApi for HttpSettlementApi {
    async fn transfer(
        &self,
        req: &SettlementTransfer,
    ) -> Result<SettlementReceipt, SettlementError> {
        let url = format!("{}/transfers", self.base_url.trim_end_matches('/'));
        debug!(payout_id = %req.payout_id, url = %url, "Settlement transfer call");

        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<SettlementReceipt>()
                .await
                .map_err(|e| SettlementError::Permanent(format!("malformed receipt: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(SettlementError::Temporary(format!("{}: {}", status, body)))
        } else {
            Err(SettlementError::Permanent(format!("{}: {}", status, body)))
        }
    }
}

fn classify_transport_error(e: reqwest::Error) -> SettlementError {
    if e.is_timeout() {
        SettlementError::Timeout
    } else if e.is_connect() {
        SettlementError::Temporary(e.to_string())
    } else {
        SettlementError::Permanent(e.to_string())
    }
}
