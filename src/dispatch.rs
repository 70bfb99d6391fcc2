//! Track dispatcher: one bounded call to the generation service, then a
//! strict decode into the routed track's result type.

use crate::error::GenerationError;
use crate::generation::{GenerationRequest, GenerationService};
use crate::model::{GenerationResult, InstructionRequest, Track};
use std::time::Duration;

/// Invoke the generation service for `track` and decode its answer.
///
/// No retries and no partially populated results: any service error, timeout
/// or missing field is returned as a [`GenerationError`].
pub async fn dispatch(
    service: &dyn GenerationService,
    track: Track,
    request: &InstructionRequest,
    timeout: Duration,
) -> Result<GenerationResult, GenerationError> {
    let outbound = GenerationRequest {
        track,
        instruction: request.instruction.clone(),
        expertise_hint: request.expertise_hint.clone(),
    };

    tracing::debug!(%track, "calling generation service");
    let raw = match tokio::time::timeout(timeout, service.generate(&outbound)).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => return Err(GenerationError::Service(e)),
        Err(_) => return Err(GenerationError::Timeout(timeout)),
    };

    decode(track, raw)
}

/// Decode a raw service response into the result type for `track`.
pub fn decode(track: Track, raw: serde_json::Value) -> Result<GenerationResult, GenerationError> {
    let decoded = match track {
        Track::Programming => serde_json::from_value(raw).map(GenerationResult::Code),
        Track::Diagram => serde_json::from_value(raw).map(GenerationResult::Diagram),
        Track::ThreatModel => serde_json::from_value(raw).map(GenerationResult::ThreatModel),
    };
    decoded.map_err(|source| GenerationError::Decode { track, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CodeResult, DiagramResult, TaskCategory};
    use async_trait::async_trait;
    use serde_json::json;

    struct Canned(serde_json::Value);

    #[async_trait]
    impl GenerationService for Canned {
        async fn generate(&self, _: &GenerationRequest) -> anyhow::Result<serde_json::Value> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl GenerationService for Broken {
        async fn generate(&self, _: &GenerationRequest) -> anyhow::Result<serde_json::Value> {
            anyhow::bail!("upstream unavailable")
        }
    }

    struct Stalled;

    #[async_trait]
    impl GenerationService for Stalled {
        async fn generate(&self, _: &GenerationRequest) -> anyhow::Result<serde_json::Value> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!({}))
        }
    }

    fn request() -> InstructionRequest {
        InstructionRequest::new("sort a list", TaskCategory::Python)
    }

    #[tokio::test]
    async fn decodes_code_result() {
        let svc = Canned(json!({"explanation": "uses sorted()", "code": "sorted(xs)"}));
        let res = dispatch(&svc, Track::Programming, &request(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            res,
            GenerationResult::Code(CodeResult {
                explanation: "uses sorted()".into(),
                code: "sorted(xs)".into(),
            })
        );
    }

    #[test]
    fn empty_strings_are_valid_but_missing_fields_are_not() {
        let ok = decode(
            Track::Diagram,
            json!({"diagram_text": "", "diagram_code": ""}),
        )
        .unwrap();
        assert_eq!(ok.track(), Track::Diagram);
        assert_eq!(
            ok,
            GenerationResult::Diagram(DiagramResult {
                diagram_text: String::new(),
                diagram_code: String::new(),
            })
        );

        let err = decode(Track::Diagram, json!({"diagram_text": "only text"})).unwrap_err();
        assert!(matches!(err, GenerationError::Decode { track: Track::Diagram, .. }));
    }

    #[test]
    fn null_or_wrong_typed_fields_fail_decode() {
        assert!(decode(
            Track::ThreatModel,
            json!({"diagram_text": "t", "diagram_code": null})
        )
        .is_err());
        assert!(decode(Track::Programming, json!({"explanation": "e", "code": 42})).is_err());
        assert!(decode(Track::Programming, json!("just a string")).is_err());
    }

    #[test]
    fn a_valid_payload_for_another_track_is_rejected() {
        let diagram_payload = json!({"diagram_text": "t", "diagram_code": "digraph{}"});
        assert!(decode(Track::Programming, diagram_payload).is_err());
    }

    #[tokio::test]
    async fn service_errors_are_reported() {
        let err = dispatch(&Broken, Track::Programming, &request(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Service(_)));
        assert!(err.to_string().contains("upstream unavailable"));
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let err = dispatch(
            &Stalled,
            Track::Programming,
            &request(),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GenerationError::Timeout(_)));
    }
}
