use crate::config::Config;
use crate::error::Error;
use crate::rate_limit::RateLimiter;
use chrono::NaiveDate;
use log::error;
use reqwest::{
    header::{AUTHORIZATION, USER_AGENT},
    Client, StatusCode, Url,
};
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

// Documented upstream quota: one call per second.
const MAX_CALLS_PER_WINDOW: u32 = 1;
const QUOTA_WINDOW: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT_VALUE: &str = "reddit-ads-connector";

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AdsApi: Send + Sync + 'static {
    /// Fetches performance report rows grouped by date and ad, from
    /// `start_date` (inclusive) through the present.
    /// # Returns
    /// A Result containing either the raw report records or an Error.
    async fn get_reports(&self, start_date: NaiveDate) -> Result<Vec<Value>, Error>;

    /// Fetches all campaigns for the configured account.
    async fn get_campaigns(&self) -> Result<Vec<Value>, Error>;

    /// Fetches all ad groups for the configured account.
    async fn get_ad_groups(&self) -> Result<Vec<Value>, Error>;

    /// Fetches all ads for the configured account.
    async fn get_ads(&self) -> Result<Vec<Value>, Error>;
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    account_id: String,
    token: String,
    limiter: RateLimiter,
}

/// One page of an ads API response. The cursor is absent or null on the
/// final page.
#[derive(Deserialize)]
struct Page {
    data: Vec<Value>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct Pagination {
    next_cursor: Option<String>,
}

impl Page {
    fn next_cursor(self) -> (Vec<Value>, Option<String>) {
        let cursor = self.pagination.and_then(|p| p.next_cursor);
        (self.data, cursor)
    }
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        Ok(ApiClient {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            base_url: config.api_url.clone(),
            account_id: config.account_id.clone(),
            token: config.api_token.clone(),
            limiter: RateLimiter::new(MAX_CALLS_PER_WINDOW, QUOTA_WINDOW),
        })
    }

    /// Issues rate-limited GETs against one account-scoped resource, walking
    /// the pagination cursor until the upstream signals no further pages.
    async fn call(&self, resource: &str, params: &[(&str, String)]) -> Result<Vec<Value>, Error> {
        // Construct the URL safely
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .extend(&["accounts", &self.account_id, resource]);
        for (key, value) in params {
            url.query_pairs_mut().append_pair(key, value);
        }

        paginate(|cursor| {
            let mut page_url = url.clone();
            if let Some(cursor) = &cursor {
                page_url.query_pairs_mut().append_pair("next_cursor", cursor);
            }

            self.fetch_page(resource, page_url)
        })
        .await
    }

    /// Fetches one page, paced by the rate limiter.
    async fn fetch_page(&self, resource: &str, page_url: Url) -> Result<Page, Error> {
        self.limiter.acquire().await;

        let resp = self
            .client
            .get(page_url)
            .header(AUTHORIZATION, format!("bearer {}", self.token))
            .header(USER_AGENT, USER_AGENT_VALUE)
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            error!("Error fetching '{}': {} {}", resource, status, body);
            return Err(Error::UnexpectedStatus {
                endpoint: resource.to_string(),
                status,
                body,
            });
        }

        Ok(resp.json().await?)
    }
}

/// Drives the cursor walk for one resource: `fetch_page` is called with no
/// cursor first, then with each cursor the previous page handed back, and the
/// walk ends at the first page without one. Returns the concatenation of
/// every page's records.
async fn paginate<F, Fut>(mut fetch_page: F) -> Result<Vec<Value>, Error>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page, Error>>,
{
    let mut records = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = fetch_page(cursor.take()).await?;
        let (data, next) = page.next_cursor();
        records.extend(data);

        cursor = next;
        if cursor.is_none() {
            break;
        }
    }

    Ok(records)
}

#[async_trait::async_trait]
impl AdsApi for ApiClient {
    async fn get_reports(&self, start_date: NaiveDate) -> Result<Vec<Value>, Error> {
        let starts_at = format!("{}T00:00:00Z", start_date.format("%Y-%m-%d"));
        let params = [
            ("starts_at", starts_at),
            ("group_by", "date".to_string()),
            ("group_by", "ad_id".to_string()),
        ];

        let records = self.call("reports", &params).await?;
        if records.is_empty() {
            return Err(Error::NoData {
                message: "No report rows found for the requested window".to_string(),
            });
        }

        Ok(records)
    }

    async fn get_campaigns(&self) -> Result<Vec<Value>, Error> {
        let records = self.call("campaigns", &[]).await?;
        if records.is_empty() {
            return Err(Error::NoData {
                message: "No campaigns found for processing".to_string(),
            });
        }

        Ok(records)
    }

    async fn get_ad_groups(&self) -> Result<Vec<Value>, Error> {
        let records = self.call("ad_groups", &[]).await?;
        if records.is_empty() {
            return Err(Error::NoData {
                message: "No ad groups found for processing".to_string(),
            });
        }

        Ok(records)
    }

    async fn get_ads(&self) -> Result<Vec<Value>, Error> {
        let records = self.call("ads", &[]).await?;
        if records.is_empty() {
            return Err(Error::NoData {
                message: "No ads found for processing".to_string(),
            });
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn test_config(api_url: &str) -> Config {
        Config {
            api_url: String::from(api_url),
            api_token: String::from("test_token"),
            account_id: String::from("t2_abc123"),
            dataset: String::from("reddit"),
            table: String::from("redditads"),
        }
    }

    #[tokio::test]
    async fn test_get_reports_invalid_url() {
        let client = ApiClient::new(&test_config("invalid_url")).unwrap();
        let start = NaiveDate::from_str("2024-01-01").unwrap();

        let result = client.get_reports(start).await;
        assert!(matches!(result.unwrap_err(), Error::UrlParsingFailed(_)));
    }

    #[tokio::test]
    async fn test_get_campaigns_unreachable_host() {
        let client = ApiClient::new(&test_config("https://api.invalid")).unwrap();

        let result = client.get_campaigns().await;
        assert!(matches!(result.unwrap_err(), Error::ApiFailure(_)));
    }

    #[tokio::test]
    async fn test_paginate_accumulates_all_pages() {
        let mut pages = vec![
            json!({"data": [{"id": "a"}, {"id": "b"}], "pagination": {"next_cursor": "p2"}}),
            json!({"data": [{"id": "c"}], "pagination": {"next_cursor": "p3"}}),
            json!({"data": [{"id": "d"}]}),
        ]
        .into_iter();
        let mut cursors = Vec::new();

        let records = paginate(|cursor| {
            cursors.push(cursor);
            let page: Page =
                serde_json::from_value(pages.next().expect("fetched past the final page"))
                    .unwrap();
            async move { Ok(page) }
        })
        .await
        .unwrap();

        // Every page's records, in order, and one request per cursor.
        assert_eq!(records.len(), 4);
        assert_eq!(records[0]["id"], "a");
        assert_eq!(records[3]["id"], "d");
        assert_eq!(
            cursors,
            vec![None, Some("p2".to_string()), Some("p3".to_string())]
        );
        assert_eq!(pages.next(), None);
    }

    #[tokio::test]
    async fn test_paginate_stops_at_first_page_error() {
        let mut fetched = 0;

        let result = paginate(|_| {
            fetched += 1;
            let page = if fetched == 1 {
                Ok(serde_json::from_value::<Page>(
                    json!({"data": [{"id": "a"}], "pagination": {"next_cursor": "p2"}}),
                )
                .unwrap())
            } else {
                Err(Error::UnexpectedStatus {
                    endpoint: "reports".to_string(),
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: String::new(),
                })
            };
            async move { page }
        })
        .await;

        assert!(matches!(
            result.unwrap_err(),
            Error::UnexpectedStatus { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
        assert_eq!(fetched, 2);
    }

    #[test]
    fn test_page_with_cursor() {
        let page: Page = serde_json::from_value(json!({
            "data": [{"id": "a"}, {"id": "b"}],
            "pagination": {"next_cursor": "abc"},
        }))
        .unwrap();

        let (data, cursor) = page.next_cursor();
        assert_eq!(data.len(), 2);
        assert_eq!(cursor.as_deref(), Some("abc"));
    }

    #[test]
    fn test_page_with_null_cursor_is_final() {
        let page: Page = serde_json::from_value(json!({
            "data": [{"id": "a"}],
            "pagination": {"next_cursor": null},
        }))
        .unwrap();

        let (_, cursor) = page.next_cursor();
        assert!(cursor.is_none());
    }

    #[test]
    fn test_page_without_pagination_is_final() {
        let page: Page = serde_json::from_value(json!({
            "data": [],
        }))
        .unwrap();

        let (data, cursor) = page.next_cursor();
        assert!(data.is_empty());
        assert!(cursor.is_none());
    }
}
