//! Supabase (PostgREST) row sink for sqlite-supasync.

use crate::config::SupabaseConfig;
use crate::error::{Error, Result};
use crate::record::{ExistingKeySet, Record, RecordKey};
use crate::schema::reviews_table;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, instrument};
use url::Url;

const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// A remote table the sync writes into.
#[allow(async_fn_in_trait)]
pub trait RowSink {
    /// Target table name.
    fn table(&self) -> &str;

    /// Succeed if the table is reachable and exists; otherwise fail with
    /// [`Error::TableMissing`] (carrying a creation hint) or a connection
    /// error.
    async fn ensure_table_exists(&self) -> Result<()>;

    /// Every primary key currently in the table.
    async fn existing_keys(&self) -> Result<ExistingKeySet>;

    /// Insert all records in one request. All-or-nothing under
    /// [`InsertMode::Strict`].
    async fn insert_batch(&self, batch: &[Record], mode: InsertMode) -> Result<()>;
}

/// How the sink treats rows whose key it already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertMode {
    /// A duplicate key fails the whole batch
    #[default]
    Strict,
    /// Duplicates are dropped by the sink and the rest of the batch lands
    IgnoreDuplicates,
}

/// PostgREST error body.
#[derive(Debug, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
}

/// Supabase REST client wrapper.
pub struct SupabaseClient {
    http: Client,
    rest_url: Url,
    config: SupabaseConfig,
}

impl SupabaseClient {
    /// Build a client for the configured project.
    ///
    /// No request is made here; reachability is checked by
    /// [`RowSink::ensure_table_exists`].
    #[instrument(skip(config), fields(url = %mask_url(&config.url), key = %mask_key(&config.key)))]
    pub fn connect(config: SupabaseConfig) -> Result<Self> {
        let base = Url::parse(&config.url)
            .map_err(|e| Error::config_with_source("Invalid Supabase URL", e))?;
        let rest_url = rest_endpoint(&base)?;

        let mut api_key = HeaderValue::from_str(&config.key)
            .map_err(|e| Error::config_with_source("Supabase key is not a valid header", e))?;
        api_key.set_sensitive(true);

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", config.key))
            .map_err(|e| Error::config_with_source("Supabase key is not a valid header", e))?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert("apikey", api_key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .default_headers(headers)
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::sink_connection("Failed to build HTTP client", e))?;

        info!("Supabase client ready for {}", rest_url);
        Ok(Self {
            http,
            rest_url,
            config,
        })
    }

    /// The CREATE TABLE statement to run when the table is missing.
    pub fn creation_hint(&self) -> String {
        reviews_table(&self.config.table, &self.config.primary_key).to_postgres_ddl()
    }

    fn table_url(&self) -> Result<Url> {
        let mut url = self.rest_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::config(format!("Supabase URL cannot be a base: {}", self.rest_url)))?
            .pop_if_empty()
            .push(&self.config.table);
        Ok(url)
    }

    /// Turn a non-success response into an error.
    async fn check(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::sink_request(
            &self.config.table,
            status.as_u16(),
            error_message(&body),
        ))
    }
}

impl RowSink for SupabaseClient {
    fn table(&self) -> &str {
        &self.config.table
    }

    #[instrument(skip(self), fields(table = %self.config.table))]
    async fn ensure_table_exists(&self) -> Result<()> {
        let response = self
            .http
            .get(self.table_url()?)
            .query(&[("select", "*"), ("limit", "1")])
            .send()
            .await
            .map_err(|e| Error::sink_connection("Table check failed", e))?;

        let status = response.status();
        if status.is_success() {
            debug!("Table {} exists", self.config.table);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if is_missing_relation(status, &body) {
            return Err(Error::table_missing(
                &self.config.table,
                self.creation_hint(),
            ));
        }

        Err(Error::sink_request(
            &self.config.table,
            status.as_u16(),
            error_message(&body),
        ))
    }

    // PostgREST caps each response at the server's `max-rows`, possibly
    // below `page_size`, so only an empty page ends the listing.
    #[instrument(skip(self), fields(table = %self.config.table))]
    async fn existing_keys(&self) -> Result<ExistingKeySet> {
        let pk = self.config.primary_key.as_str();
        let page_size = self.config.page_size;
        let order = format!("{}.asc", pk);
        let url = self.table_url()?;

        let mut keys = ExistingKeySet::new();
        let mut offset = 0usize;

        loop {
            let response = self
                .http
                .get(url.clone())
                .query(&[("select", pk), ("order", order.as_str())])
                .query(&[("limit", page_size), ("offset", offset)])
                .send()
                .await
                .map_err(|e| Error::sink_connection("Listing existing keys failed", e))?;

            let body = self
                .check(response)
                .await?
                .text()
                .await
                .map_err(|e| Error::sink_connection("Reading key page failed", e))?;

            let page: Vec<Map<String, JsonValue>> = serde_json::from_str(&body)
                .map_err(|e| Error::serialization("Unexpected key listing response", e))?;

            let fetched = page.len();
            keys.extend(
                page.iter()
                    .filter_map(|row| row.get(pk))
                    .filter_map(RecordKey::from_json),
            );
            debug!(offset, fetched, "Fetched key page");

            if fetched == 0 {
                break;
            }
            offset += fetched;
        }

        info!("Found {} existing keys in {}", keys.len(), self.config.table);
        Ok(keys)
    }

    #[instrument(skip(self, batch), fields(table = %self.config.table, count = batch.len()))]
    async fn insert_batch(&self, batch: &[Record], mode: InsertMode) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let request = self.http.post(self.table_url()?);
        let request = match mode {
            InsertMode::Strict => request.header("Prefer", "return=minimal"),
            InsertMode::IgnoreDuplicates => request
                .query(&[("on_conflict", self.config.primary_key.as_str())])
                .header("Prefer", "return=minimal,resolution=ignore-duplicates"),
        };

        let response = request
            .json(batch)
            .send()
            .await
            .map_err(|e| Error::sink_connection("Batch insert failed", e))?;

        self.check(response).await?;

        debug!("Inserted {} rows into {}", batch.len(), self.config.table);
        Ok(())
    }
}

/// `https://xyz.supabase.co` -> `https://xyz.supabase.co/rest/v1`
fn rest_endpoint(base: &Url) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::config(format!("Supabase URL cannot be a base: {}", base)))?
        .pop_if_empty()
        .extend(["rest", "v1"]);
    Ok(url)
}

fn is_missing_relation(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::NOT_FOUND {
        return true;
    }

    serde_json::from_str::<PostgrestError>(body)
        .ok()
        .and_then(|e| e.code)
        .is_some_and(|code| code == "42P01" || code == "PGRST205")
}

fn error_message(body: &str) -> String {
    if let Ok(PostgrestError {
        message: Some(message),
        ..
    }) = serde_json::from_str::<PostgrestError>(body)
    {
        return message;
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "(empty response)".to_string()
    } else {
        trimmed.chars().take(500).collect()
    }
}

/// Mask an API key for logging.
pub fn mask_key(key: &str) -> String {
    if key.len() <= 8 {
        return "***".to_string();
    }
    let prefix: String = key.chars().take(4).collect();
    format!("{}***", prefix)
}

/// Mask credentials in a URL for logging. The query string is dropped
/// since PostgREST accepts `apikey` there.
pub fn mask_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.set_query(None);
            parsed.to_string()
        }
        Err(_) => "[invalid url]".to_string(),
    }
}
