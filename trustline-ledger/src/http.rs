//! REST client for the settlement ledger service.
//!
//! Every call is a JSON `POST` to `<base_url>/<endpoint>` whose body carries
//! the `candidate` key identifying the ledger namespace.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{LedgerError, LedgerResult};
use crate::gateway::{PeeringInfo, SettlementGateway, UserRecord};

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default ledger namespace.
pub const DEFAULT_CANDIDATE: &str = "trustline";

#[derive(Debug, Serialize)]
pub(crate) struct AddUserRequest<'a> {
    pub candidate: &'a str,
    #[serde(rename = "public_key")]
    pub id: &'a str,
    #[serde(rename = "amount")]
    pub balance: u64,
    #[serde(rename = "private_key")]
    pub credential: &'a str,
    pub peering_info: PeeringInfo,
}

#[derive(Debug, Serialize)]
pub(crate) struct PayUserRequest<'a> {
    pub candidate: &'a str,
    pub sender: &'a str,
    pub receiver: &'a str,
    #[serde(rename = "private_key")]
    pub credential: &'a str,
    pub amount: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct CandidateRequest<'a> {
    pub candidate: &'a str,
}

/// Ledger gateway backed by the REST service.
#[derive(Debug, Clone)]
pub struct HttpLedger {
    client: reqwest::Client,
    base_url: String,
    candidate: String,
}

impl HttpLedger {
    /// Create a client for the ledger at `base_url`.
    pub fn new(base_url: impl Into<String>) -> LedgerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client reusing an existing `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            candidate: DEFAULT_CANDIDATE.to_string(),
        }
    }

    /// Set the ledger namespace sent with every request.
    pub fn with_candidate(mut self, candidate: impl Into<String>) -> Self {
        self.candidate = candidate.into();
        self
    }

    /// Base URL of the ledger service.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), name)
    }

    async fn post<B: Serialize + ?Sized>(&self, name: &str, body: &B) -> LedgerResult<String> {
        let url = self.endpoint(name);
        tracing::debug!(url = %url, "Ledger request");

        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(LedgerError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl SettlementGateway for HttpLedger {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn register_user(
        &self,
        id: &str,
        initial_balance: u64,
        credential: &str,
        addr: SocketAddr,
    ) -> LedgerResult<()> {
        let body = AddUserRequest {
            candidate: &self.candidate,
            id,
            balance: initial_balance,
            credential,
            peering_info: PeeringInfo::from_addr(addr),
        };
        self.post("add_user", &body).await?;
        Ok(())
    }

    async fn pay_user(
        &self,
        sender: &str,
        receiver: &str,
        credential: &str,
        amount: u64,
    ) -> LedgerResult<()> {
        let body = PayUserRequest {
            candidate: &self.candidate,
            sender,
            receiver,
            credential,
            amount,
        };
        self.post("pay_user", &body).await?;
        Ok(())
    }

    async fn list_users(&self) -> LedgerResult<BTreeMap<String, UserRecord>> {
        let body = CandidateRequest {
            candidate: &self.candidate,
        };
        let text = self.post("get_users", &body).await?;
        serde_json::from_str(&text).map_err(|e| LedgerError::InvalidResponse(e.to_string()))
    }

    async fn delete_all_users(&self) -> LedgerResult<()> {
        let body = CandidateRequest {
            candidate: &self.candidate,
        };
        self.post("delete_all_users", &body).await?;
        Ok(())
    }
}
