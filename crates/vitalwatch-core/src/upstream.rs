//! Upstream telemetry source.
//!
//! The upstream answers `GET {base_url}{entity_id}` with the entity's current
//! state. Only `trace.sensors` is required; everything else is profile data.
//!
//! ```json
//! { "id": 12, "firstname": "Janek", "lastname": "Grzegorczyk",
//!   "birthdate": "1982", "disabled": false,
//!   "trace": { "id": 2494801012010, "name": "bach",
//!              "sensors": [ { "id": 0, "value": 1023, "anomaly": false }, ... ] } }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::UpstreamError;
use crate::model::{EntityId, EntityProfile, Reading, Snapshot};

/// One successful fetch: the readings plus whatever profile fields came with them.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSnapshot {
    pub snapshot: Snapshot,
    pub profile: EntityProfile,
}

/// Source of raw per-entity snapshots.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, entity: EntityId) -> Result<FetchedSnapshot, UpstreamError>;
}

#[derive(Deserialize)]
struct WireSensor {
    value: f64,
    #[serde(default)]
    anomaly: bool,
}

/// Parse an upstream response body. The sensor count must equal `channels`.
pub fn parse_payload(body: &str, channels: usize) -> Result<FetchedSnapshot, UpstreamError> {
    let root: Value =
        serde_json::from_str(body).map_err(|e| UpstreamError::Malformed(e.to_string()))?;

    let sensors = root
        .get("trace")
        .and_then(|t| t.get("sensors"))
        .ok_or_else(|| UpstreamError::Malformed("missing trace.sensors".into()))?;
    let sensors: Vec<WireSensor> = serde_json::from_value(sensors.clone())
        .map_err(|e| UpstreamError::Malformed(format!("trace.sensors: {e}")))?;
    if sensors.len() != channels {
        return Err(UpstreamError::Malformed(format!(
            "expected {channels} sensors, got {}",
            sensors.len()
        )));
    }

    let readings = sensors
        .into_iter()
        .enumerate()
        .map(|(channel, s)| Reading {
            channel,
            value: s.value,
            anomaly: s.anomaly,
        })
        .collect();

    let profile = EntityProfile {
        firstname: text_field(&root, "firstname"),
        lastname: text_field(&root, "lastname"),
        birthdate: text_field(&root, "birthdate"),
        disabled: root.get("disabled").and_then(Value::as_bool),
        trace_name: root.get("trace").and_then(|t| text_field(t, "name")),
    };

    Ok(FetchedSnapshot {
        snapshot: Snapshot::new(readings),
        profile,
    })
}

/// String or number field as text.
fn text_field(obj: &Value, name: &str) -> Option<String> {
    match obj.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// HTTP upstream with a bounded per-request timeout.
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
    channels: usize,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        channels: usize,
    ) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Request(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            channels,
            timeout,
        })
    }

    /// Request URL for an entity: the base URL with the id appended.
    pub fn url_for(&self, entity: EntityId) -> String {
        format!("{}{}", self.base_url, entity)
    }

    fn map_error(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::timeout(self.timeout)
        } else {
            UpstreamError::Request(err.to_string())
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, entity: EntityId) -> Result<FetchedSnapshot, UpstreamError> {
        let response = self
            .client
            .get(self.url_for(entity))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| self.map_error(e))?;
        parse_payload(&body, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;

    const MOCK_DATA: &str = r#"{ "birthdate": "1982", "disabled": false, "firstname": "Janek", "id": 12, "lastname": "Grzegorczyk", "trace": { "id": 2494801012010, "name": "bach", "sensors": [ { "anomaly": false, "id": 0, "value": 1023 }, { "anomaly": false, "id": 1, "value": 692 }, { "anomaly": false, "id": 2, "value": 31 }, { "anomaly": false, "id": 3, "value": 542 }, { "anomaly": false, "id": 4, "value": 134 }, { "anomaly": false, "id": 5, "value": 1023 } ] } }"#;

    fn id(n: u32) -> EntityId {
        EntityId::new(n).unwrap()
    }

    // -----------------------------------------------------------------------
    // Payload parsing
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_full_payload() {
        let fetched = parse_payload(MOCK_DATA, 6).unwrap();
        assert_eq!(fetched.snapshot.len(), 6);
        assert_eq!(fetched.snapshot.value(2), Some(31.0));
        assert!(!fetched.snapshot.has_anomaly());
        assert_eq!(fetched.profile.firstname.as_deref(), Some("Janek"));
        assert_eq!(fetched.profile.lastname.as_deref(), Some("Grzegorczyk"));
        assert_eq!(fetched.profile.birthdate.as_deref(), Some("1982"));
        assert_eq!(fetched.profile.disabled, Some(false));
        assert_eq!(fetched.profile.trace_name.as_deref(), Some("bach"));
    }

    #[test]
    fn test_parse_sensors_without_ids_or_flags() {
        let body = r#"{"trace":{"sensors":[{"value":1},{"value":2,"anomaly":true},{"value":3}]}}"#;
        let fetched = parse_payload(body, 3).unwrap();
        assert_eq!(fetched.snapshot.flagged_channels(), vec![1]);
        assert!(fetched.profile.is_empty());
    }

    #[test]
    fn test_parse_numeric_birthdate() {
        let body = r#"{"birthdate":1982,"trace":{"sensors":[{"value":1}]}}"#;
        let fetched = parse_payload(body, 1).unwrap();
        assert_eq!(fetched.profile.birthdate.as_deref(), Some("1982"));
    }

    #[test]
    fn test_parse_rejects_missing_trace() {
        let err = parse_payload(r#"{"firstname":"x"}"#, 6).unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed(_)));
    }

    #[test]
    fn test_parse_rejects_wrong_channel_count() {
        let body = r#"{"trace":{"sensors":[{"value":1},{"value":2}]}}"#;
        let err = parse_payload(body, 6).unwrap_err();
        assert!(err.to_string().contains("expected 6 sensors, got 2"));
    }

    #[test]
    fn test_parse_rejects_non_numeric_value() {
        let body = r#"{"trace":{"sensors":[{"value":"high"}]}}"#;
        assert!(matches!(
            parse_payload(body, 1),
            Err(UpstreamError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        assert!(matches!(
            parse_payload("<html>", 6),
            Err(UpstreamError::Malformed(_))
        ));
    }

    // -----------------------------------------------------------------------
    // HTTP client
    // -----------------------------------------------------------------------

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/patient/")
    }

    #[tokio::test]
    async fn test_http_fetch_success() {
        let app = Router::new().route(
            "/patient/{id}",
            get(|Path(id): Path<u32>| async move {
                assert_eq!(id, 12);
                MOCK_DATA
            }),
        );
        let base = serve(app).await;
        let upstream = HttpUpstream::new(base, Duration::from_secs(5), 6).unwrap();
        let fetched = upstream.fetch(id(12)).await.unwrap();
        assert_eq!(fetched.snapshot.value(0), Some(1023.0));
    }

    #[tokio::test]
    async fn test_http_fetch_error_status() {
        let app = Router::new().route(
            "/patient/{id}",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let base = serve(app).await;
        let upstream = HttpUpstream::new(base, Duration::from_secs(5), 6).unwrap();
        let err = upstream.fetch(id(1)).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Status { status: 503 }));
    }

    #[tokio::test]
    async fn test_http_fetch_timeout() {
        let app = Router::new().route(
            "/patient/{id}",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                MOCK_DATA
            }),
        );
        let base = serve(app).await;
        let upstream = HttpUpstream::new(base, Duration::from_millis(100), 6).unwrap();
        let err = upstream.fetch(id(1)).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Timeout { millis: 100 }), "{err}");
    }

    #[tokio::test]
    async fn test_http_fetch_connection_refused() {
        let upstream =
            HttpUpstream::new("http://127.0.0.1:1/patient/", Duration::from_secs(2), 6).unwrap();
        let err = upstream.fetch(id(1)).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Request(_)), "{err}");
    }

    #[test]
    fn test_url_for_appends_id() {
        let upstream =
            HttpUpstream::new("http://host:5000/patient/", Duration::from_secs(1), 6).unwrap();
        assert_eq!(upstream.url_for(id(7)), "http://host:5000/patient/7");
    }
}
