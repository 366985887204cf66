//! Request extractors for the protocol surface.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{
    auth::RecipientId,
    catalog::Pagination,
    error::ServerError,
    reader::{Version, VersionRange},
};

#[async_trait]
impl<S> FromRequestParts<S> for RecipientId
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let recipient_id = parts
            .extensions
            .get::<RecipientId>()
            .ok_or_else(|| {
                tracing::error!("the `RecipientId` extension was not set");
                ServerError::unauthenticated("Missing or invalid Authorization header")
            })
            .map(|x| x.clone())?;

        Ok(recipient_id)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Pagination
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let query = parts.uri.query().unwrap_or_default();
        let value = serde_urlencoded::from_str(query).map_err(|_| {
            ServerError::invalid_parameter("the `pageToken` or `maxResults` parameter is invalid")
        })?;
        Ok(value)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct VersionQueryParams {
    starting_timestamp: Option<DateTime<Utc>>,
}

#[async_trait]
impl<S> FromRequestParts<S> for Version
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let query = parts.uri.query().unwrap_or_default();
        let value = serde_urlencoded::from_str::<VersionQueryParams>(query).map_err(|_| {
            ServerError::invalid_parameter("the `startingTimestamp` parameter is invalid")
        })?;
        match value.starting_timestamp {
            Some(ts) => Ok(Version::Timestamp(ts)),
            None => Ok(Version::Latest),
        }
    }
}

/// Response format negotiated through the capabilities header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Files are plain parquet; statistics are structured objects.
    Parquet,
    /// Files are wrapped delta actions; statistics stay json strings.
    Delta,
}

/// Parsed `delta-sharing-capabilities` request header.
///
/// The header is a `;`-separated list of `key=value[,value]` pairs, e.g.
/// `responseformat=delta;readerfeatures=deletionvectors,columnmapping`.
/// Unknown keys and values are ignored; an absent header means the
/// parquet format without an end-stream action.
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    response_formats: Vec<ResponseFormat>,
    reader_features: Option<Vec<String>>,
    include_end_stream_action: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            response_formats: vec![ResponseFormat::Parquet],
            reader_features: None,
            include_end_stream_action: false,
        }
    }
}

impl Capabilities {
    /// Response formats the client accepts, in the order advertised.
    pub fn response_formats(&self) -> &[ResponseFormat] {
        &self.response_formats
    }

    /// Whether the client accepts the delta response format.
    pub fn accepts_delta_format(&self) -> bool {
        self.response_formats.contains(&ResponseFormat::Delta)
    }

    /// Whether the client accepts the parquet response format.
    pub fn accepts_parquet_format(&self) -> bool {
        self.response_formats.contains(&ResponseFormat::Parquet)
    }

    /// The reader features advertised by the client, if any.
    pub fn reader_features(&self) -> Option<&Vec<String>> {
        self.reader_features.as_ref()
    }

    /// Whether the client advertised the given reader feature.
    pub fn has_reader_feature(&self, feature: &str) -> bool {
        self.reader_features()
            .map(|features| features.iter().any(|f| f.eq_ignore_ascii_case(feature)))
            .unwrap_or_default()
    }

    /// Whether the client asked for the trailing end-stream action.
    pub fn include_end_stream_action(&self) -> bool {
        self.include_end_stream_action
    }

    fn parse(value: &str) -> Self {
        let mut capabilities = Capabilities::default();
        for pair in value.split(';') {
            let mut iter = pair.splitn(2, '=');
            let key = iter.next().unwrap_or_default().trim().to_ascii_lowercase();
            let value = iter.next().unwrap_or_default().trim();

            match key.as_str() {
                "responseformat" => {
                    let formats: Vec<ResponseFormat> = value
                        .split(',')
                        .filter_map(|format| match format.trim().to_ascii_lowercase().as_str() {
                            "parquet" => Some(ResponseFormat::Parquet),
                            "delta" => Some(ResponseFormat::Delta),
                            _ => None,
                        })
                        .collect();
                    if !formats.is_empty() {
                        capabilities.response_formats = formats;
                    }
                }
                "readerfeatures" => {
                    capabilities.reader_features = Some(
                        value
                            .split(',')
                            .map(|s| s.trim().to_owned())
                            .filter(|s| !s.is_empty())
                            .collect(),
                    );
                }
                "includeendstreamaction" => {
                    capabilities.include_end_stream_action =
                        value.eq_ignore_ascii_case("true");
                }
                _ => {}
            }
        }
        capabilities
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Capabilities
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get("delta-sharing-capabilities") else {
            return Ok(Capabilities::default());
        };
        let value = header
            .to_str()
            .map_err(|_| ServerError::invalid_parameter("the capabilities header is invalid"))?;
        Ok(Capabilities::parse(value))
    }
}

/// Body of a table query request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryRequest {
    /// Sql-like hint strings used for data skipping.
    pub predicate_hints: Vec<String>,
    /// Advisory cap on the number of returned rows.
    pub limit_hint: Option<i64>,
    /// Query a specific table version.
    pub version: Option<u64>,
    /// Query the table version current at a timestamp.
    pub timestamp: Option<String>,
    /// Starting version for a change query through the query endpoint.
    pub starting_version: Option<u64>,
    /// Ending version for a change query through the query endpoint.
    pub ending_version: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct RawTableChangeParams {
    starting_version: Option<u64>,
    starting_timestamp: Option<String>,
    ending_version: Option<u64>,
    ending_timestamp: Option<String>,
}

/// Version range requested on the table changes endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableChangeParams {
    version_range: VersionRange,
}

impl TableChangeParams {
    /// The requested version range.
    pub fn version_range(&self) -> VersionRange {
        self.version_range
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for TableChangeParams
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let query = parts.uri.query().unwrap_or_default();
        let v = serde_urlencoded::from_str::<RawTableChangeParams>(query)
            .map_err(|_| ServerError::invalid_parameter("the change range parameters are invalid"))?;

        let range = match (
            v.starting_version,
            v.ending_version,
            v.starting_timestamp,
            v.ending_timestamp,
        ) {
            (Some(start), end, None, None) => {
                if let Some(end) = end {
                    if start > end {
                        return Err(ServerError::invalid_parameter(
                            "the starting version cannot be greater than the ending version",
                        ));
                    }
                }
                VersionRange::Version { start, end }
            }
            (None, None, Some(start), end) => {
                let start_ts = start
                    .parse::<DateTime<Utc>>()
                    .map_err(|e| ServerError::invalid_parameter(e.to_string()))?;
                let end_ts = end
                    .map(|e| e.parse::<DateTime<Utc>>())
                    .transpose()
                    .map_err(|e| ServerError::invalid_parameter(e.to_string()))?;
                if let Some(end_ts) = end_ts {
                    if end_ts < start_ts {
                        return Err(ServerError::invalid_parameter(
                            "the starting timestamp must be before the ending timestamp",
                        ));
                    }
                }
                VersionRange::Timestamp {
                    start: start_ts,
                    end: end_ts,
                }
            }
            _ => {
                return Err(ServerError::invalid_parameter(
                    "specify the range of table versions either with `startingVersion` (and \
                     optionally `endingVersion`) or with `startingTimestamp` (and optionally \
                     `endingTimestamp`)",
                ));
            }
        };

        Ok(TableChangeParams {
            version_range: range,
        })
    }
}

/// Validate a share, schema or table name taken from the request path.
///
/// Paths are percent-decoded before lookup; decoded names containing `/`
/// or control characters are rejected.
pub(crate) fn validate_shared_name(name: &str) -> Result<(), ServerError> {
    if name.is_empty() || name.contains('/') || name.chars().any(|c| c.is_control()) {
        return Err(ServerError::invalid_parameter(format!(
            "`{}` is not a valid name",
            name.escape_default()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::header::CONTENT_TYPE;
    use axum::http::Request;
    use axum::Json;
    use chrono::TimeZone;
    use serde_json::json;

    use crate::error::ServerErrorKind;

    #[tokio::test]
    async fn extract_recipient_id() {
        let req = Request::builder()
            .uri("http://example.com/test")
            .extension(RecipientId::known("foo"))
            .body(Body::empty())
            .unwrap();

        let recipient_id = RecipientId::from_request(req, &()).await.unwrap();
        assert_eq!(recipient_id.as_ref(), "foo");

        let req = Request::builder()
            .uri("http://example.com/test")
            .body(Body::empty())
            .unwrap();

        let err = RecipientId::from_request(req, &()).await.unwrap_err();
        assert_eq!(err.kind(), ServerErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn extract_pagination() {
        let uri = "http://example.com/test";
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        assert_eq!(
            Pagination::from_request(req, &()).await.unwrap(),
            Pagination::new(None, None)
        );

        let uri = "http://example.com/test?maxResults=1";
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        assert_eq!(
            Pagination::from_request(req, &()).await.unwrap(),
            Pagination::new(Some(1), None)
        );

        let uri = "http://example.com/test?maxResults=2&pageToken=efgh";
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        assert_eq!(
            Pagination::from_request(req, &()).await.unwrap(),
            Pagination::new(Some(2), Some("efgh".to_owned()))
        );
    }

    #[tokio::test]
    async fn reject_pagination() {
        // invalid datatype for maxResults, should be a number
        let uri = "http://example.com/test?maxResults=aaa";
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let err = Pagination::from_request(req, &()).await.unwrap_err();
        assert_eq!(err.kind(), ServerErrorKind::InvalidParameter);
    }

    #[tokio::test]
    async fn extract_version() {
        let req = Request::builder()
            .uri("http://example.com/test")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            Version::from_request(req, &()).await.unwrap(),
            Version::Latest
        );

        let req = Request::builder()
            .uri("http://example.com/test?startingTimestamp=2022-01-01T00:00:00Z")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            Version::from_request(req, &()).await.unwrap(),
            Version::Timestamp(Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn reject_version() {
        let req = Request::builder()
            .uri("http://example.com/test?startingTimestamp=abc")
            .body(Body::empty())
            .unwrap();
        let err = Version::from_request(req, &()).await.unwrap_err();
        assert_eq!(err.kind(), ServerErrorKind::InvalidParameter);
    }

    #[tokio::test]
    async fn extract_capabilities() {
        // default capabilities
        let req = Request::builder()
            .uri("http://example.com/test")
            .body(Body::empty())
            .unwrap();
        let capabilities = Capabilities::from_request(req, &()).await.unwrap();
        assert_eq!(capabilities, Capabilities::default());
        assert!(capabilities.accepts_parquet_format());
        assert!(!capabilities.accepts_delta_format());
        assert!(!capabilities.include_end_stream_action());

        // explicit parquet
        let req = Request::builder()
            .uri("http://example.com/test")
            .header("delta-sharing-capabilities", "responseformat=parquet")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            Capabilities::from_request(req, &()).await.unwrap(),
            Capabilities::default()
        );

        // delta format with reader features
        let req = Request::builder()
            .uri("http://example.com/test")
            .header(
                "delta-sharing-capabilities",
                "responseformat=delta;readerfeatures=deletionvectors,columnmapping",
            )
            .body(Body::empty())
            .unwrap();
        let capabilities = Capabilities::from_request(req, &()).await.unwrap();
        assert!(capabilities.accepts_delta_format());
        assert!(!capabilities.accepts_parquet_format());
        assert!(capabilities.has_reader_feature("deletionVectors"));
        assert!(!capabilities.has_reader_feature("timestampNtz"));

        // both formats plus the end stream action
        let req = Request::builder()
            .uri("http://example.com/test")
            .header(
                "delta-sharing-capabilities",
                "responseformat=parquet,delta;includeendstreamaction=true",
            )
            .body(Body::empty())
            .unwrap();
        let capabilities = Capabilities::from_request(req, &()).await.unwrap();
        assert!(capabilities.accepts_delta_format());
        assert!(capabilities.accepts_parquet_format());
        assert!(capabilities.include_end_stream_action());

        // unknown keys and values are ignored
        let req = Request::builder()
            .uri("http://example.com/test")
            .header(
                "delta-sharing-capabilities",
                "responseformat=feather;futurekey=1",
            )
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            Capabilities::from_request(req, &()).await.unwrap(),
            Capabilities::default()
        );
    }

    #[tokio::test]
    async fn extract_query_request() {
        let params = json!({
            "predicateHints": ["year = 2024"],
            "limitHint": 1000,
            "version": 2
        });
        let req = Request::builder()
            .uri("http://example.com/test")
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .body(Body::from(serde_json::to_string(&params).unwrap()))
            .unwrap();

        let Json(query) = Json::<QueryRequest>::from_request(req, &()).await.unwrap();
        assert_eq!(
            query,
            QueryRequest {
                predicate_hints: vec!["year = 2024".to_owned()],
                limit_hint: Some(1000),
                version: Some(2),
                timestamp: None,
                starting_version: None,
                ending_version: None,
            }
        );
    }

    #[tokio::test]
    async fn extract_table_change_params() {
        let req = Request::builder()
            .uri("http://example.com/test?startingVersion=0&endingVersion=2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            TableChangeParams::from_request(req, &())
                .await
                .unwrap()
                .version_range(),
            VersionRange::Version {
                start: 0,
                end: Some(2)
            }
        );

        // the ending version may be omitted
        let req = Request::builder()
            .uri("http://example.com/test?startingVersion=3")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            TableChangeParams::from_request(req, &())
                .await
                .unwrap()
                .version_range(),
            VersionRange::Version {
                start: 3,
                end: None
            }
        );

        let req = Request::builder()
            .uri("http://example.com/test?startingTimestamp=2000-01-01T00:00:00Z&endingTimestamp=2000-01-02T00:00:00Z")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            TableChangeParams::from_request(req, &())
                .await
                .unwrap()
                .version_range(),
            VersionRange::Timestamp {
                start: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
                end: Some(Utc.with_ymd_and_hms(2000, 1, 2, 0, 0, 0).unwrap())
            }
        );
    }

    #[tokio::test]
    async fn reject_table_change_params() {
        // no range at all
        let req = Request::builder()
            .uri("http://example.com/test")
            .body(Body::empty())
            .unwrap();
        let err = TableChangeParams::from_request(req, &()).await.unwrap_err();
        assert_eq!(err.kind(), ServerErrorKind::InvalidParameter);

        // inverted version range
        let req = Request::builder()
            .uri("http://example.com/test?startingVersion=5&endingVersion=2")
            .body(Body::empty())
            .unwrap();
        let err = TableChangeParams::from_request(req, &()).await.unwrap_err();
        assert_eq!(err.kind(), ServerErrorKind::InvalidParameter);

        // mixed version and timestamp bounds
        let req = Request::builder()
            .uri("http://example.com/test?startingVersion=0&endingTimestamp=2000-01-02T00:00:00Z")
            .body(Body::empty())
            .unwrap();
        let err = TableChangeParams::from_request(req, &()).await.unwrap_err();
        assert_eq!(err.kind(), ServerErrorKind::InvalidParameter);
    }

    #[test]
    fn shared_name_validation() {
        assert!(validate_shared_name("sales_share").is_ok());
        assert!(validate_shared_name("").is_err());
        assert!(validate_shared_name("a/b").is_err());
        assert!(validate_shared_name("a\u{7}b").is_err());
    }
}
