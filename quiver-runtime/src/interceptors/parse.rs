//! Parse stage: body bytes in, normalized data out.

use async_trait::async_trait;
use quiver_core::{GraphError, ParseError, QuiverResult};
use quiver_storage::NormalizedCache;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

use crate::chain::{Chain, Interceptor, InterceptorRequest, InterceptorResponse};

/// Top-level shape of a response body.
#[derive(Debug, Deserialize)]
struct WirePayload {
    #[serde(default)]
    data: Option<Map<String, JsonValue>>,
    #[serde(default)]
    errors: Vec<GraphError>,
    #[serde(default)]
    extensions: Map<String, JsonValue>,
}

/// Parses the raw body returned by the network stage and normalizes its
/// data through the operation's field schema.
///
/// Normalization only builds records; committing them is left to the
/// cache policy stage, so a decode failure here never touches the store.
pub struct ParseInterceptor {
    cache: Arc<NormalizedCache>,
}

impl ParseInterceptor {
    pub fn new(cache: Arc<NormalizedCache>) -> Self {
        Self { cache }
    }

    fn parse(raw: &[u8]) -> QuiverResult<WirePayload> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(ParseError::EmptyPayload.into());
        }
        serde_json::from_slice(raw).map_err(|e| {
            ParseError::MalformedPayload {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl Interceptor for ParseInterceptor {
    fn name(&self) -> &str {
        "parse"
    }

    async fn intercept(&self, request: InterceptorRequest, chain: Chain<'_>) -> QuiverResult<InterceptorResponse> {
        let mut response = chain.proceed(request.clone()).await?;
        let Some(raw) = response.raw.as_deref() else {
            return Ok(response);
        };
        let payload = Self::parse(raw)?;

        if !payload.errors.is_empty() {
            tracing::debug!(
                operation = %request.operation_name,
                errors = payload.errors.len(),
                "Response carries protocol errors"
            );
        }
        if let Some(data) = payload.data {
            let normalized = self
                .cache
                .normalize(&request.root_key(), &request.fields, &data, &request.variables)?;
            response.data = Some(normalized.data);
            response.records = normalized.records;
            response.dependent_keys = normalized.dependent_keys;
        }
        response.errors = payload.errors;
        response.extensions = payload.extensions;
        response.from_cache = false;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::InterceptorChain;
    use quiver_core::{
        DecodeError, FetchPolicy, OperationKind, QuiverError, ResponseField, Variables,
    };
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    /// Returns a fixed body.
    struct Body(&'static [u8]);

    #[async_trait]
    impl Interceptor for Body {
        fn name(&self) -> &str {
            "body"
        }

        async fn intercept(&self, _request: InterceptorRequest, _chain: Chain<'_>) -> QuiverResult<InterceptorResponse> {
            Ok(InterceptorResponse::network(self.0.to_vec()))
        }
    }

    fn run(body: &'static [u8]) -> QuiverResult<InterceptorResponse> {
        let cache = Arc::new(NormalizedCache::in_memory());
        let chain = InterceptorChain::new(vec![
            Arc::new(ParseInterceptor::new(cache)),
            Arc::new(Body(body)),
        ]);
        let request = InterceptorRequest {
            call_id: Uuid::now_v7(),
            operation_id: "op".to_string(),
            operation_name: "Hero".to_string(),
            document: "query Hero { hero { name } }".to_string(),
            kind: OperationKind::Query,
            variables: Variables::new(),
            fields: vec![ResponseField::object("hero", vec![ResponseField::string("name").non_null()])].into(),
            fetch_policy: FetchPolicy::NetworkOnly,
            cancellation: CancellationToken::new(),
        };
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(chain.proceed(request))
    }

    #[test]
    fn test_parses_and_normalizes_data() {
        let response = run(br#"{"data":{"hero":{"name":"R2-D2"}}}"#).unwrap();
        assert_eq!(
            response.data.unwrap().get("hero"),
            Some(&serde_json::json!({"name": "R2-D2"}))
        );
        assert_eq!(response.records.len(), 2);
        assert!(response.dependent_keys.contains("QUERY_ROOT.hero"));
        assert!(!response.from_cache);
    }

    #[test]
    fn test_protocol_errors_are_data() {
        let response = run(
            br#"{"data":null,"errors":[{"message":"Not found","locations":[{"line":1,"column":9}],"path":["hero"]}]}"#,
        )
        .unwrap();
        assert!(response.data.is_none());
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].message, "Not found");
        assert!(response.errors[0].custom_attributes.contains_key("path"));
    }

    #[test]
    fn test_malformed_and_empty_bodies() {
        assert!(matches!(
            run(b"{not json"),
            Err(QuiverError::Parse(ParseError::MalformedPayload { .. }))
        ));
        assert_eq!(run(b"  ").unwrap_err(), QuiverError::Parse(ParseError::EmptyPayload));
    }

    #[test]
    fn test_decode_error_is_fatal() {
        assert_eq!(
            run(br#"{"data":{"hero":{"name":null}}}"#).unwrap_err(),
            QuiverError::Decode(DecodeError::NullField {
                path: "hero.name".to_string()
            })
        );
    }
}
