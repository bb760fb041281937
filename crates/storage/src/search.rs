//! Search-index document store.
//!
//! Talks to an OpenSearch-compatible REST endpoint. Each collection is an
//! index of the same name.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use async_trait::async_trait;
use pharmaqa_core::{Bound, Document, Filter};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{DocumentStore, Result, StorageError};

/// Buckets fetched per page of a duplicate-term aggregation.
const TERM_PAGE_SIZE: usize = 1000;

/// Document store backed by a search index.
#[derive(Clone)]
pub struct SearchIndexStore {
    /// HTTP client
    client: Client,

    /// Base URL, without trailing slash
    endpoint: String,

    /// Basic-auth credentials
    credentials: Option<(String, String)>,

    /// Per-index field used to order samples
    timestamp_fields: HashMap<String, String>,

    /// Ordering field for indices without their own
    default_timestamp_field: Option<String>,
}

impl SearchIndexStore {
    /// Create a client for `endpoint` (e.g. `https://search.internal:9200`).
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = ClientBuilder::new().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credentials: None,
            timestamp_fields: HashMap::new(),
            default_timestamp_field: None,
        })
    }

    /// Authenticate with HTTP basic auth.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    /// Field used to order samples of one index, newest first.
    pub fn with_timestamp_field(mut self, collection: impl Into<String>, field: impl Into<String>) -> Self {
        self.timestamp_fields.insert(collection.into(), field.into());
        self
    }

    /// Ordering field for indices without their own.
    pub fn with_default_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.default_timestamp_field = Some(field.into());
        self
    }

    fn timestamp_field(&self, collection: &str) -> Option<&str> {
        self.timestamp_fields
            .get(collection)
            .or(self.default_timestamp_field.as_ref())
            .map(String::as_str)
    }

    /// POST a body to `/{collection}/{action}`.
    ///
    /// A missing index is reported as `Ok(None)` so callers can treat it as an
    /// empty collection.
    async fn post(&self, collection: &str, action: &str, body: &Value) -> Result<Option<Value>> {
        let url = format!("{}/{}/{}", self.endpoint, collection, action);
        debug!(%url, "querying search index");

        let mut request = self.client.post(&url).json(body);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| StorageError::unavailable(collection, e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            warn!(collection, "index not found, treating as empty");
            return Ok(None);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StorageError::unavailable(
                collection,
                format!("search API error (status {}): {}", status, text),
            ));
        }

        let value = response
            .json::<Value>()
            .await
            .map_err(|e| StorageError::unavailable(collection, format!("malformed response: {}", e)))?;
        Ok(Some(value))
    }
}

#[async_trait]
impl DocumentStore for SearchIndexStore {
    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<u64> {
        let body = json!({ "query": query_dsl(filter) });
        Ok(self
            .post(collection, "_count", &body)
            .await?
            .map(|v| parse_count(&v))
            .unwrap_or(0))
    }

    async fn sample(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let body = sample_body(filter, limit, self.timestamp_field(collection));
        Ok(self
            .post(collection, "_search", &body)
            .await?
            .map(|v| parse_hits(&v))
            .unwrap_or_default())
    }

    async fn aggregate_term_counts(
        &self,
        collection: &str,
        field: &str,
        min_count: u64,
    ) -> Result<BTreeMap<String, u64>> {
        // Composite aggregations page through every distinct value; they have
        // no `min_doc_count`, so the threshold is applied here.
        let mut counts = BTreeMap::new();
        let mut after: Option<Value> = None;
        loop {
            let body = terms_body(field, after.as_ref());
            let Some(response) = self.post(collection, "_search", &body).await? else {
                break;
            };
            let page = parse_term_page(&response);
            let exhausted = page.buckets.is_empty();
            counts.extend(page.buckets.into_iter().filter(|(_, n)| *n >= min_count));

            match page.after_key {
                Some(key) if !exhausted && after.as_ref() != Some(&key) => after = Some(key),
                _ => break,
            }
        }
        debug!(collection, field, groups = counts.len(), "aggregated term counts");
        Ok(counts)
    }
}

/// Translate a filter into the search query DSL.
pub fn query_dsl(filter: Option<&Filter>) -> Value {
    match filter {
        None => json!({ "match_all": {} }),
        Some(filter) => filter_dsl(filter),
    }
}

fn filter_dsl(filter: &Filter) -> Value {
    match filter {
        Filter::Exists { field } => json!({ "exists": { "field": field } }),
        Filter::Missing { field } => json!({
            "bool": { "must_not": [ { "exists": { "field": field } } ] }
        }),
        Filter::Term { field, value } => {
            // Text fields are analyzed; exact matches go through the keyword sub-field.
            let target = if value.is_string() {
                format!("{}.keyword", field)
            } else {
                field.clone()
            };
            json!({ "term": { target: value } })
        }
        Filter::Matches { field, text } => json!({ "match": { field: text } }),
        Filter::Range { field, gte, lt } => {
            let mut bounds = serde_json::Map::new();
            if let Some(b) = gte {
                bounds.insert("gte".into(), bound_value(b));
            }
            if let Some(b) = lt {
                bounds.insert("lt".into(), bound_value(b));
            }
            json!({ "range": { field: bounds } })
        }
        Filter::All { filters } => json!({
            "bool": { "filter": filters.iter().map(filter_dsl).collect::<Vec<_>>() }
        }),
        Filter::Any { filters } => json!({
            "bool": {
                "should": filters.iter().map(filter_dsl).collect::<Vec<_>>(),
                "minimum_should_match": 1
            }
        }),
    }
}

fn bound_value(bound: &Bound) -> Value {
    match bound {
        Bound::Time(t) => Value::String(t.to_rfc3339()),
        Bound::Number(n) => json!(n),
    }
}

/// Search body returning the newest `limit` documents.
pub fn sample_body(filter: Option<&Filter>, limit: usize, timestamp_field: Option<&str>) -> Value {
    let mut sort = Vec::new();
    if let Some(field) = timestamp_field {
        sort.push(json!({ field: { "order": "desc", "unmapped_type": "date" } }));
    }
    // Index order breaks ties so repeated samples come back identical.
    sort.push(json!("_doc"));
    json!({
        "query": query_dsl(filter),
        "size": limit,
        "sort": sort,
    })
}

/// One page of a composite aggregation over `field`, resuming after `after`.
pub fn terms_body(field: &str, after: Option<&Value>) -> Value {
    let mut composite = json!({
        "size": TERM_PAGE_SIZE,
        "sources": [ { "term": { "terms": { "field": format!("{}.keyword", field) } } } ]
    });
    if let Some(after) = after {
        composite["after"] = after.clone();
    }
    json!({
        "size": 0,
        "aggs": { "duplicates": { "composite": composite } }
    })
}

fn parse_count(response: &Value) -> u64 {
    response.get("count").and_then(Value::as_u64).unwrap_or(0)
}

fn parse_hits(response: &Value) -> Vec<Document> {
    response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| hit.get("_source").cloned())
                .filter_map(Document::from_value)
                .collect()
        })
        .unwrap_or_default()
}

struct TermPage {
    buckets: Vec<(String, u64)>,
    after_key: Option<Value>,
}

fn parse_term_page(response: &Value) -> TermPage {
    let aggregation = response.pointer("/aggregations/duplicates");
    let buckets = aggregation
        .and_then(|a| a.get("buckets"))
        .and_then(Value::as_array)
        .map(|buckets| {
            buckets
                .iter()
                .filter_map(|bucket| {
                    let key = match bucket.pointer("/key/term")? {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    let count = bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0);
                    Some((key, count))
                })
                .collect()
        })
        .unwrap_or_default();
    TermPage {
        buckets,
        after_key: aggregation.and_then(|a| a.get("after_key")).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// Answer one connection per canned `(status, body)` pair and hand back
    /// the request bodies received.
    async fn serve(responses: Vec<(u16, Value)>) -> (String, JoinHandle<Vec<Value>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                requests.push(read_body(&mut socket).await);
                let body = body.to_string();
                let reply = format!(
                    "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
            requests
        });
        (format!("http://{}", addr), handle)
    }

    async fn read_body(socket: &mut TcpStream) -> Value {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return Value::Null;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let start = end + 4;
            if buf.len() >= start + length {
                return serde_json::from_slice(&buf[start..start + length]).unwrap_or(Value::Null);
            }
        }
    }

    fn store(endpoint: &str) -> SearchIndexStore {
        SearchIndexStore::new(endpoint, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_no_filter_is_match_all() {
        assert_eq!(query_dsl(None), json!({ "match_all": {} }));
    }

    #[test]
    fn test_string_terms_use_keyword_subfield() {
        let dsl = query_dsl(Some(&Filter::term("sponsor", "Merck")));
        assert_eq!(dsl, json!({ "term": { "sponsor.keyword": "Merck" } }));

        let dsl = query_dsl(Some(&Filter::term("riskScore", 75)));
        assert_eq!(dsl, json!({ "term": { "riskScore": 75 } }));
    }

    #[test]
    fn test_range_and_missing_translation() {
        let since = Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).unwrap();
        let dsl = query_dsl(Some(&Filter::since("processedAt", since)));
        assert_eq!(
            dsl,
            json!({ "range": { "processedAt": { "gte": "2026-10-17T00:00:00+00:00" } } })
        );

        let dsl = query_dsl(Some(&Filter::Missing { field: "sponsor".into() }));
        assert_eq!(dsl["bool"]["must_not"][0]["exists"]["field"], "sponsor");
    }

    #[test]
    fn test_combinators_translate_to_bool_queries() {
        let filter = Filter::Any {
            filters: vec![Filter::exists("a"), Filter::matches_text("b", "merck")],
        };
        let dsl = query_dsl(Some(&filter));
        assert_eq!(dsl["bool"]["minimum_should_match"], 1);
        assert_eq!(dsl["bool"]["should"][1], json!({ "match": { "b": "merck" } }));
    }

    #[test]
    fn test_sample_body_sorts_newest_first() {
        let body = sample_body(None, 50, Some("processedAt"));
        assert_eq!(body["size"], 50);
        assert_eq!(body["sort"][0]["processedAt"]["order"], "desc");
        assert_eq!(body["sort"][1], "_doc");

        let body = sample_body(None, 5, None);
        assert_eq!(body["sort"], json!(["_doc"]));
    }

    #[test]
    fn test_terms_body_pages_a_composite_aggregation() {
        let body = terms_body("id", None);
        let composite = &body["aggs"]["duplicates"]["composite"];
        assert_eq!(body["size"], 0);
        assert_eq!(composite["size"], TERM_PAGE_SIZE);
        assert_eq!(composite["sources"][0]["term"]["terms"]["field"], "id.keyword");
        assert!(composite.get("after").is_none());

        let after = json!({ "term": "NCT04567890" });
        let body = terms_body("id", Some(&after));
        assert_eq!(body["aggs"]["duplicates"]["composite"]["after"], after);
    }

    #[test]
    fn test_response_parsing() {
        assert_eq!(parse_count(&json!({ "count": 47 })), 47);
        assert_eq!(parse_count(&json!({})), 0);

        let hits = parse_hits(&json!({
            "hits": { "hits": [
                { "_id": "1", "_source": { "id": "keytruda-1" } },
                { "_id": "2" }
            ] }
        }));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text("id"), Some("keytruda-1"));

        let page = parse_term_page(&json!({
            "aggregations": { "duplicates": {
                "after_key": { "term": 42 },
                "buckets": [
                    { "key": { "term": "NCT04567890" }, "doc_count": 3 },
                    { "key": { "term": 42 }, "doc_count": 2 }
                ]
            } }
        }));
        assert_eq!(
            page.buckets,
            vec![("NCT04567890".to_string(), 3), ("42".to_string(), 2)]
        );
        assert_eq!(page.after_key, Some(json!({ "term": 42 })));

        let page = parse_term_page(&json!({ "aggregations": { "duplicates": { "buckets": [] } } }));
        assert!(page.buckets.is_empty());
        assert!(page.after_key.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_collection_unavailable() {
        let store = SearchIndexStore::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = store.count("brands", None).await.unwrap_err();
        assert!(matches!(err, StorageError::CollectionUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_missing_index_is_an_empty_collection() {
        let missing = json!({ "error": { "type": "index_not_found_exception" }, "status": 404 });
        let (url, server) = serve(vec![
            (404, missing.clone()),
            (404, missing.clone()),
            (404, missing),
        ])
        .await;
        let store = store(&url);

        assert_eq!(store.count("patents", None).await.unwrap(), 0);
        assert!(store.sample("patents", None, 10).await.unwrap().is_empty());
        assert!(store.aggregate_term_counts("patents", "id", 2).await.unwrap().is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_collection_unavailable() {
        let (url, server) = serve(vec![(500, json!({ "error": "shard failure" }))]).await;
        let err = store(&url).count("trials", None).await.unwrap_err();
        match err {
            StorageError::CollectionUnavailable { collection, reason } => {
                assert_eq!(collection, "trials");
                assert!(reason.contains("500"));
                assert!(reason.contains("shard failure"));
            }
            other => panic!("unexpected error: {other}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_successful_responses_are_parsed() {
        let (url, server) = serve(vec![
            (200, json!({ "count": 47 })),
            (200, json!({ "hits": { "hits": [ { "_source": { "id": "NCT04567890" } } ] } })),
        ])
        .await;
        let store = store(&url).with_default_timestamp_field("processedAt");

        assert_eq!(store.count("trials", Some(&Filter::exists("sponsor"))).await.unwrap(), 47);
        let docs = store.sample("trials", None, 1).await.unwrap();
        assert_eq!(docs[0].text("id"), Some("NCT04567890"));

        let requests = server.await.unwrap();
        assert_eq!(requests[0]["query"], json!({ "exists": { "field": "sponsor" } }));
        assert_eq!(requests[1]["sort"][0]["processedAt"]["order"], "desc");
    }

    #[tokio::test]
    async fn test_term_counts_follow_every_page() {
        let page = |buckets: Value, after: Option<Value>| {
            let mut aggregation = json!({ "buckets": buckets });
            if let Some(after) = after {
                aggregation["after_key"] = after;
            }
            json!({ "aggregations": { "duplicates": aggregation } })
        };
        let (url, server) = serve(vec![
            (
                200,
                page(
                    json!([
                        { "key": { "term": "NCT00000001" }, "doc_count": 2 },
                        { "key": { "term": "NCT00000002" }, "doc_count": 1 }
                    ]),
                    Some(json!({ "term": "NCT00000002" })),
                ),
            ),
            (
                200,
                page(
                    json!([{ "key": { "term": "NCT00000003" }, "doc_count": 3 }]),
                    Some(json!({ "term": "NCT00000003" })),
                ),
            ),
            (200, page(json!([]), None)),
        ])
        .await;

        let counts = store(&url).aggregate_term_counts("trials", "id", 2).await.unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts.get("NCT00000001"), Some(&2));
        assert_eq!(counts.get("NCT00000003"), Some(&3));

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 3);
        let after = |i: usize| requests[i]["aggs"]["duplicates"]["composite"]["after"].clone();
        assert_eq!(after(0), Value::Null);
        assert_eq!(after(1), json!({ "term": "NCT00000002" }));
        assert_eq!(after(2), json!({ "term": "NCT00000003" }));
    }
}
