//! Mock settlement counterparty for tests and dev mode.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{SettlementApi, SettlementError, SettlementReceipt, SettlementTransfer};

/// Scripted settlement collaborator.
///
/// Failures are scripted per merchant and consumed front-to-back; any
/// unscripted call succeeds with a deterministic reference derived from the
/// payout id. Keying by merchant keeps concurrently running scenarios from
/// consuming each other's scripts.
#[derive(Default)]
pub struct MockSettlementApi {
    scripts: Mutex<HashMap<String, VecDeque<SettlementError>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockSettlementApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for the merchant's next call.
    pub fn enqueue_failure(&self, merchant_id: &str, error: SettlementError) {
        self.scripts
            .lock()
            .unwrap()
            .entry(merchant_id.to_string())
            .or_default()
            .push_back(error);
    }

    /// Number of transfer calls observed for the merchant.
    pub fn calls_for(&self, merchant_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(merchant_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl SettlementApi for MockSettlementApi {
    async fn transfer(
        &self,
        req: &SettlementTransfer,
    ) -> Result<SettlementReceipt, SettlementError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(req.merchant_id.clone())
            .or_insert(0) += 1;

        if let Some(queue) = self.scripts.lock().unwrap().get_mut(&req.merchant_id) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }

        Ok(SettlementReceipt {
            external_reference: format!("bankref_{}", req.payout_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Currency;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn transfer_req(merchant_id: &str) -> SettlementTransfer {
        SettlementTransfer {
            payout_id: Uuid::new_v4(),
            merchant_id: merchant_id.to_string(),
            amount: Decimal::from(40),
            currency: Currency::Ngn,
        }
    }

    #[tokio::test]
    async fn test_script_consumed_in_order() {
        let mock = MockSettlementApi::new();
        mock.enqueue_failure("m-1", SettlementError::Timeout);
        mock.enqueue_failure("m-1", SettlementError::Permanent("closed".into()));

        let req = transfer_req("m-1");

        assert!(matches!(
            mock.transfer(&req).await,
            Err(SettlementError::Timeout)
        ));
        assert!(matches!(
            mock.transfer(&req).await,
            Err(SettlementError::Permanent(_))
        ));

        // Script exhausted: success with deterministic reference
        let receipt = mock.transfer(&req).await.unwrap();
        assert_eq!(
            receipt.external_reference,
            format!("bankref_{}", req.payout_id)
        );
        assert_eq!(mock.calls_for("m-1"), 3);
    }

    #[tokio::test]
    async fn test_scripts_are_isolated_per_merchant() {
        let mock = MockSettlementApi::new();
        mock.enqueue_failure("m-1", SettlementError::Timeout);

        // A different merchant's call must not consume m-1's script
        assert!(mock.transfer(&transfer_req("m-2")).await.is_ok());
        assert!(matches!(
            mock.transfer(&transfer_req("m-1")).await,
            Err(SettlementError::Timeout)
        ));
        assert_eq!(mock.calls_for("m-1"), 1);
        assert_eq!(mock.calls_for("m-2"), 1);
    }
}
