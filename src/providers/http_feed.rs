use super::util::with_retry;
use crate::core::feed::{FeedTransaction, TransactionFeed};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

/// Reads transactions from a remote bank-feed service.
///
/// `GET {base_url}/users/{user}/transactions/{id}` returns one transaction or
/// 404; `GET {base_url}/users/{user}/transactions` returns
/// `{"transactions": [...]}`.
pub struct HttpTransactionFeed {
    base_url: Url,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TransactionList {
    transactions: Vec<FeedTransaction>,
}

impl HttpTransactionFeed {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("flowbank/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid feed base URL: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("Feed base URL cannot hold a path: {base_url}"));
        }
        Ok(Self { base_url, client })
    }

    /// `{base}/users/{user}/transactions[/{id}]`, each segment percent-encoded.
    fn transactions_url(&self, user_id: &str, id: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("Feed base URL cannot hold a path: {}", self.base_url))?;
            segments
                .pop_if_empty()
                .push("users")
                .push(user_id)
                .push("transactions");
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response> {
        debug!("Requesting transactions from {}", url);
        with_retry(
            || async move { self.client.get(url.clone()).send().await },
            3,
            500,
        )
        .await
        .with_context(|| format!("Failed to send request to {url}"))
    }
}

#[async_trait]
impl TransactionFeed for HttpTransactionFeed {
    async fn transaction(&self, user_id: &str, id: &str) -> Result<Option<FeedTransaction>> {
        let url = self.transactions_url(user_id, Some(id))?;
        let response = self.get(&url).await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("Transaction {} not found in feed", id);
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!(
                "Feed returned {} for transaction {}",
                response.status(),
                id
            ));
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to get response text for transaction: {id}"))?;
        let transaction: FeedTransaction = serde_json::from_str(&body).with_context(|| {
            format!("Failed to parse feed response for transaction: {id}. Response: '{body}'")
        })?;
        if transaction.id != id {
            return Err(anyhow!(
                "Feed returned transaction {} when asked for {}",
                transaction.id,
                id
            ));
        }
        Ok(Some(transaction))
    }

    async fn transactions(&self, user_id: &str) -> Result<Vec<FeedTransaction>> {
        let url = self.transactions_url(user_id, None)?;
        let response = self.get(&url).await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Feed returned {} listing transactions for {}",
                response.status(),
                user_id
            ));
        }

        let body = response.text().await?;
        let list: TransactionList = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse transaction list. Response: '{body}'"))?;
        debug!("Feed returned {} transactions", list.transactions.len());
        Ok(list.transactions)
    }
}
