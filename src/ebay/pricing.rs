use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

const FINDING_ENDPOINT: &str = "https://svcs.ebay.com/services/search/FindingService/v1";
const MIN_PRICE: f64 = 2.0;
const MAX_PRICE: f64 = 5000.0;

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("finding api request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("finding api returned HTTP {0}")]
    Status(u16),
}

/// Sold-listing price research through the eBay Finding API.
#[derive(Clone)]
pub struct PriceResearch {
    http: Client,
    app_id: String,
    endpoint: String,
}

impl PriceResearch {
    pub fn new(http: Client, app_id: impl Into<String>) -> Self {
        Self {
            http,
            app_id: app_id.into(),
            endpoint: FINDING_ENDPOINT.to_string(),
        }
    }

    pub async fn median_sold_price(
        &self,
        keywords: &str,
        category_id: &str,
    ) -> Result<Option<f64>, PricingError> {
        let keywords = keywords.trim();
        if keywords.is_empty() {
            return Ok(None);
        }
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("OPERATION-NAME", "findCompletedItems"),
                ("SERVICE-VERSION", "1.13.0"),
                ("SECURITY-APPNAME", self.app_id.as_str()),
                ("RESPONSE-DATA-FORMAT", "JSON"),
                ("REST-PAYLOAD", "true"),
                ("keywords", keywords),
                ("categoryId", category_id),
                ("itemFilter(0).name", "SoldItemsOnly"),
                ("itemFilter(0).value", "true"),
                ("paginationInput.entriesPerPage", "50"),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PricingError::Status(response.status().as_u16()));
        }
        let body: Value = response.json().await?;
        let median = median_from_finding_response(&body);
        debug!(target: "chatbay.export", keywords, category_id, ?median, "sold price research");
        Ok(median)
    }

    /// Research that never fails the row: errors are logged and dropped.
    pub async fn lookup(&self, keywords: &str, category_id: &str) -> Option<f64> {
        match self.median_sold_price(keywords, category_id).await {
            Ok(median) => median,
            Err(err) => {
                warn!(target: "chatbay.export", error = %err, "price research failed");
                None
            }
        }
    }
}

/// Median of sold prices within [2, 5000] from a `findCompletedItems` body.
pub fn median_from_finding_response(body: &Value) -> Option<f64> {
    let items = body
        .pointer("/findCompletedItemsResponse/0/searchResult/0/item")
        .and_then(Value::as_array)?;

    let mut prices: Vec<f64> = items
        .iter()
        .filter_map(|item| {
            let status = item.pointer("/sellingStatus/0")?;
            let state = status.pointer("/sellingState/0").and_then(Value::as_str)?;
            if !state.eq_ignore_ascii_case("EndedWithSales") {
                return None;
            }
            let amount = status.pointer("/currentPrice/0/__value__")?;
            let value = match amount {
                Value::String(s) => s.trim().parse::<f64>().ok()?,
                Value::Number(n) => n.as_f64()?,
                _ => return None,
            };
            (MIN_PRICE..=MAX_PRICE).contains(&value).then_some(value)
        })
        .collect();

    if prices.is_empty() {
        return None;
    }
    prices.sort_by(|a, b| a.total_cmp(b));
    let mid = prices.len() / 2;
    Some(if prices.len() % 2 == 0 {
        (prices[mid - 1] + prices[mid]) / 2.0
    } else {
        prices[mid]
    })
}
