//! Payload decoding for responses [`crate::remote_store::RemoteStore`]
//! receives from a [`crate::transport::Transport`].

use entitystore_core::{EntityResult, EntityStoreError, QueryResultMeta};
use serde::de::DeserializeOwned;

/// Decodes a JSON array response body into a flat entity list with no
/// root-identifier restriction (every decoded entity is a root result).
///
/// The default decoder `RemoteStoreBuilder` installs; override with
/// `.decoder(..)` for payloads shaped differently (an envelope carrying a
/// root-identifier set alongside inlined relationship hydration, paginated
/// listings, etc).
pub fn decode_json_array<E: DeserializeOwned>(body: &[u8]) -> EntityResult<(Vec<E>, QueryResultMeta)> {
    if body.is_empty() {
        return Ok((Vec::new(), QueryResultMeta::default()));
    }
    let entities: Vec<E> = serde_json::from_slice(body)
        .map_err(|error| EntityStoreError::Deserialization(Box::new(error)))?;
    Ok((entities, QueryResultMeta::default()))
}

/// Reconstructs a fresh, independently-owned [`EntityStoreError`] from a
/// borrowed one.
///
/// `EntityStoreError` isn't `Clone` (its `Deserialization`/`Engine`
/// variants box a trait object), but every caller sharing an in-flight
/// dispatch needs its own owned error to return. The boxed inner errors
/// degrade to their `Display` text — callers only need that for logging
/// and `is_recoverable`, both of which survive this round-trip.
pub fn shareable_error(error: &EntityStoreError) -> EntityStoreError {
    match error {
        EntityStoreError::IdentifierNotFound => EntityStoreError::IdentifierNotFound,
        EntityStoreError::IdentifierNotSynced => EntityStoreError::IdentifierNotSynced,
        EntityStoreError::InvalidContext => EntityStoreError::InvalidContext,
        EntityStoreError::NotSupported => EntityStoreError::NotSupported,
        EntityStoreError::EmptyResponse => EntityStoreError::EmptyResponse,
        EntityStoreError::NotFoundInPayload => EntityStoreError::NotFoundInPayload,
        EntityStoreError::Api { status, payload } => {
            EntityStoreError::Api { status: *status, payload: payload.clone() }
        }
        EntityStoreError::NetworkCancelled => EntityStoreError::NetworkCancelled,
        EntityStoreError::Deserialization(inner) => {
            EntityStoreError::Deserialization(Box::new(DetachedError(inner.to_string())))
        }
        EntityStoreError::Engine(inner) => {
            EntityStoreError::Engine(Box::new(DetachedError(inner.to_string())))
        }
        EntityStoreError::InvalidEngineState(message) => {
            EntityStoreError::InvalidEngineState(message.clone())
        }
        EntityStoreError::QueueCancelled => EntityStoreError::QueueCancelled,
        EntityStoreError::TimeoutElapsed => EntityStoreError::TimeoutElapsed,
    }
}

#[derive(Debug)]
struct DetachedError(String);

impl std::fmt::Display for DetachedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DetachedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Deserialize)]
    struct Gadget {
        name: String,
    }

    #[test]
    fn empty_body_decodes_to_empty_result() {
        let (entities, meta) = decode_json_array::<Gadget>(&[]).unwrap();
        assert!(entities.is_empty());
        assert!(meta.root_identifiers.is_none());
    }

    #[test]
    fn valid_json_array_decodes() {
        let body = br#"[{"name":"a"},{"name":"b"}]"#;
        let (entities, _meta) = decode_json_array::<Gadget>(body).unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].name, "a");
    }

    #[test]
    fn malformed_json_maps_to_deserialization_error() {
        let err = decode_json_array::<Gadget>(b"not json").unwrap_err();
        assert!(matches!(err, EntityStoreError::Deserialization(_)));
    }

    #[test]
    fn shareable_error_preserves_api_status_and_payload() {
        let original = EntityStoreError::Api { status: 404, payload: Some("missing".into()) };
        let shared = shareable_error(&original);
        assert!(matches!(shared, EntityStoreError::Api { status: 404, payload: Some(p) } if p == "missing"));
    }

    #[test]
    fn shareable_error_degrades_boxed_inner_to_display_text() {
        let original = EntityStoreError::Engine(Box::new(DetachedError("boom".into())));
        let shared = shareable_error(&original);
        assert_eq!(shared.to_string(), original.to_string());
    }
}
