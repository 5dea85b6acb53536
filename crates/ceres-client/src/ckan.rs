use ceres_core::config::HttpConfig;
use ceres_core::error::AppError;
use ceres_core::traits::{CatalogClient, PageResult};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

/// Generic wrapper for CKAN API responses.
///
/// CKAN API reference: <https://docs.ckan.org/en/2.9/api/>
///
/// CKAN always returns responses with the structure:
/// ```json
/// {
///     "success": bool,
///     "result": T
/// }
/// ```
#[derive(Deserialize, Debug)]
struct CkanResponse<T> {
    success: bool,
    result: Option<T>,
}

/// `result` payload of `package_search`.
#[derive(Deserialize, Debug)]
struct SearchResult {
    count: Option<u64>,
    results: Vec<Value>,
}

/// HTTP client for the `package_search` action of a CKAN catalog.
///
/// Every call to [`fetch_page`](CatalogClient::fetch_page) performs exactly one
/// request. Wrap the client in [`RetryingClient`](crate::RetryingClient) to
/// retry transient failures.
///
/// # Examples
///
/// ```no_run
/// use ceres_client::CkanClient;
/// use ceres_core::config::HttpConfig;
/// use ceres_core::traits::CatalogClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = CkanClient::new(
///     "https://www.donneesquebec.ca/recherche/api/3/action",
///     &HttpConfig::default(),
/// )?;
/// let page = client.fetch_page(0, 100).await?;
/// println!("Fetched {} records", page.records.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CkanClient {
    client: Client,
    base_url: Url,
    timeout_secs: u64,
}

impl CkanClient {
    /// Creates a client for the action API rooted at `base_url_str`
    /// (e.g. `https://catalog.example.org/api/3/action`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidPortalUrl` if the URL is malformed or not HTTP(S).
    /// Returns `AppError::TransportError` if the HTTP client cannot be built.
    pub fn new(base_url_str: &str, http: &HttpConfig) -> Result<Self, AppError> {
        let base_url = parse_base_url(base_url_str)?;

        let client = Client::builder()
            .user_agent(http.user_agent.as_str())
            .timeout(http.timeout)
            .build()
            .map_err(|e| AppError::TransportError(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            timeout_secs: http.timeout.as_secs(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds `{base}/package_search?start={offset}&rows={rows}`.
    fn search_url(&self, offset: u64, rows: u32) -> Result<Url, AppError> {
        let mut url = self
            .base_url
            .join("package_search")
            .map_err(|e| AppError::InvalidPortalUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("start", &offset.to_string())
            .append_pair("rows", &rows.to_string());
        Ok(url)
    }

    fn request_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {}", e))
        } else {
            AppError::TransportError(e.to_string())
        }
    }
}

impl CatalogClient for CkanClient {
    async fn fetch_page(&self, offset: u64, page_size: u32) -> Result<PageResult, AppError> {
        if page_size == 0 {
            return Err(AppError::ValidationError(
                "page size must be greater than zero".to_string(),
            ));
        }

        let url = self.search_url(offset, page_size)?;
        tracing::debug!(%url, "Requesting catalog page");

        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, &url));
        }

        let body = resp.text().await.map_err(|e| self.request_error(e))?;
        parse_search_page(&body, offset)
    }
}

/// Validates the catalog root and makes sure relative joins append to its path.
fn parse_base_url(raw: &str) -> Result<Url, AppError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| AppError::InvalidPortalUrl(format!("{}: {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::InvalidPortalUrl(format!(
            "{}: scheme must be http or https",
            raw
        )));
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Maps a non-success HTTP status onto the transport error family.
fn status_error(status: StatusCode, url: &Url) -> AppError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        AppError::RateLimitExceeded
    } else if status.is_server_error() {
        AppError::ServerError(status.as_u16())
    } else {
        AppError::TransportError(format!("HTTP {} from {}", status.as_u16(), url))
    }
}

/// Decodes a `package_search` body. Any shape other than a successful
/// envelope with a `results` array is a format error.
fn parse_search_page(body: &str, offset: u64) -> Result<PageResult, AppError> {
    let response: CkanResponse<SearchResult> = serde_json::from_str(body)
        .map_err(|e| AppError::FormatError(format!("invalid package_search body: {}", e)))?;

    if !response.success {
        return Err(AppError::FormatError(
            "CKAN API returned success: false".to_string(),
        ));
    }

    let result = response
        .result
        .ok_or_else(|| AppError::FormatError("response has no 'result'".to_string()))?;

    Ok(PageResult {
        records: result.results,
        total: result.count,
        offset,
    })
}
