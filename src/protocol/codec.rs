// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Envelope codec: typed envelopes to protobuf frame bytes and back.
//!
//! Decoding is also where structural validation happens. A frame that decodes
//! as protobuf but breaks an envelope rule (empty id, unknown kind, request
//! without an operation, error response without detail) is a `DecodeError`,
//! which the dispatcher reports as a protocol error.

use prost::Message;
use serde_json::Value;
use tokio_util::codec::LengthDelimitedCodec;

use crate::errors::{DecodeError, EncodeError, ErrorCategory, OperationError};
use crate::protocol::envelope::{
    CancelEnvelope, Envelope, RequestEnvelope, ResponseEnvelope, ResponseOutcome,
};
use crate::protocol::wire::{ErrorDetail, Frame, FrameKind, FrameStatus};

/// Upper bound on a single frame (16 MiB).
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Length-delimited framing used on every connection.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, EncodeError> {
    let frame = match envelope {
        Envelope::Request(request) => Frame {
            id: request.id.clone(),
            kind: FrameKind::Request as i32,
            operation: request.operation.clone(),
            payload: serde_json::to_vec(&request.payload)?,
            issued_at: request.issued_at,
            ..Default::default()
        },
        Envelope::Response(response) => {
            let (status, payload, error) = match &response.outcome {
                ResponseOutcome::Ok(value) => (FrameStatus::Ok, serde_json::to_vec(value)?, None),
                ResponseOutcome::Error(error) => (
                    FrameStatus::Error,
                    Vec::new(),
                    Some(ErrorDetail {
                        category: error.category.as_str().to_string(),
                        message: error.message.clone(),
                    }),
                ),
                ResponseOutcome::Timeout => (FrameStatus::Timeout, Vec::new(), None),
            };
            Frame {
                id: response.id.clone(),
                kind: FrameKind::Response as i32,
                payload,
                status: status as i32,
                error,
                duration_ms: response.duration_ms,
                ..Default::default()
            }
        }
        Envelope::Cancel(cancel) => Frame {
            id: cancel.id.clone(),
            kind: FrameKind::Cancel as i32,
            ..Default::default()
        },
    };

    Ok(frame.encode_to_vec())
}

pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let frame = Frame::decode(bytes)?;

    let kind = FrameKind::try_from(frame.kind).map_err(|_| DecodeError::UnknownKind(frame.kind))?;
    if kind == FrameKind::Unspecified {
        return Err(DecodeError::UnknownKind(frame.kind));
    }
    if frame.id.is_empty() {
        return Err(DecodeError::MissingId);
    }

    match kind {
        FrameKind::Request => {
            if frame.operation.is_empty() {
                return Err(DecodeError::MissingOperation { id: frame.id });
            }
            let payload = decode_payload(&frame.id, &frame.payload)?;
            Ok(Envelope::Request(RequestEnvelope {
                id: frame.id,
                operation: frame.operation,
                payload,
                issued_at: frame.issued_at,
            }))
        }
        FrameKind::Response => {
            let outcome = match FrameStatus::try_from(frame.status) {
                Ok(FrameStatus::Ok) => ResponseOutcome::Ok(decode_payload(&frame.id, &frame.payload)?),
                Ok(FrameStatus::Error) => {
                    let detail = frame
                        .error
                        .ok_or_else(|| DecodeError::MissingErrorDetail { id: frame.id.clone() })?;
                    ResponseOutcome::Error(OperationError::new(
                        ErrorCategory::parse(&detail.category),
                        detail.message,
                    ))
                }
                Ok(FrameStatus::Timeout) => ResponseOutcome::Timeout,
                Ok(FrameStatus::Unspecified) | Err(_) => {
                    return Err(DecodeError::UnknownStatus {
                        id: frame.id,
                        status: frame.status,
                    })
                }
            };
            Ok(Envelope::Response(ResponseEnvelope {
                id: frame.id,
                outcome,
                duration_ms: frame.duration_ms,
            }))
        }
        FrameKind::Cancel => Ok(Envelope::Cancel(CancelEnvelope { id: frame.id })),
        FrameKind::Unspecified => Err(DecodeError::UnknownKind(frame.kind)),
    }
}

/// Recover the id of a request frame that failed validation, so the sender
/// can still be told its message was rejected.
pub fn request_id_hint(bytes: &[u8]) -> Option<String> {
    let frame = Frame::decode(bytes).ok()?;
    if frame.kind == FrameKind::Request as i32 && !frame.id.is_empty() {
        Some(frame.id)
    } else {
        None
    }
}

fn decode_payload(id: &str, bytes: &[u8]) -> Result<Value, DecodeError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|source| DecodeError::InvalidPayload {
        id: id.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(frame: Frame) -> Vec<u8> {
        frame.encode_to_vec()
    }

    #[test]
    fn test_request_survives_the_wire() {
        let request = Envelope::Request(RequestEnvelope::new(
            "req-7",
            "query-store",
            json!({"key": "user/1"}),
        ));

        let bytes = encode(&request).unwrap();
        assert_eq!(decode(&bytes).unwrap(), request);
    }

    #[test]
    fn test_error_response_keeps_category_and_message() {
        let response = Envelope::Response(ResponseEnvelope::error(
            "req-8",
            OperationError::new(ErrorCategory::CapabilityDenied, "missing write-fs"),
            3,
        ));

        let decoded = decode(&encode(&response).unwrap()).unwrap();
        match decoded {
            Envelope::Response(ResponseEnvelope {
                outcome: ResponseOutcome::Error(error),
                duration_ms,
                ..
            }) => {
                assert_eq!(error.category, ErrorCategory::CapabilityDenied);
                assert_eq!(error.message, "missing write-fs");
                assert_eq!(duration_ms, 3);
            }
            other => panic!("Expected error response, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_structural_violations() {
        struct TestCase {
            name: &'static str,
            frame: Frame,
            check: fn(&DecodeError) -> bool,
        }

        let test_cases = vec![
            TestCase {
                name: "unspecified kind",
                frame: Frame {
                    id: "a".to_string(),
                    ..Default::default()
                },
                check: |e: &DecodeError| matches!(e, DecodeError::UnknownKind(0)),
            },
            TestCase {
                name: "out of range kind",
                frame: Frame {
                    id: "a".to_string(),
                    kind: 42,
                    ..Default::default()
                },
                check: |e: &DecodeError| matches!(e, DecodeError::UnknownKind(42)),
            },
            TestCase {
                name: "missing id",
                frame: Frame {
                    kind: FrameKind::Request as i32,
                    operation: "eval".to_string(),
                    ..Default::default()
                },
                check: |e: &DecodeError| matches!(e, DecodeError::MissingId),
            },
            TestCase {
                name: "request without operation",
                frame: Frame {
                    id: "a".to_string(),
                    kind: FrameKind::Request as i32,
                    ..Default::default()
                },
                check: |e: &DecodeError| matches!(e, DecodeError::MissingOperation { .. }),
            },
            TestCase {
                name: "response without status",
                frame: Frame {
                    id: "a".to_string(),
                    kind: FrameKind::Response as i32,
                    ..Default::default()
                },
                check: |e: &DecodeError| matches!(e, DecodeError::UnknownStatus { status: 0, .. }),
            },
            TestCase {
                name: "error response without detail",
                frame: Frame {
                    id: "a".to_string(),
                    kind: FrameKind::Response as i32,
                    status: FrameStatus::Error as i32,
                    ..Default::default()
                },
                check: |e: &DecodeError| matches!(e, DecodeError::MissingErrorDetail { .. }),
            },
            TestCase {
                name: "payload that is not json",
                frame: Frame {
                    id: "a".to_string(),
                    kind: FrameKind::Request as i32,
                    operation: "eval".to_string(),
                    payload: b"{not json".to_vec(),
                    ..Default::default()
                },
                check: |e: &DecodeError| matches!(e, DecodeError::InvalidPayload { .. }),
            },
        ];

        for test_case in test_cases {
            let error = decode(&raw(test_case.frame)).expect_err(test_case.name);
            assert!((test_case.check)(&error), "{}: unexpected {:?}", test_case.name, error);
        }
    }

    #[test]
    fn test_garbage_bytes_are_malformed() {
        let result = decode(&[0xff, 0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_empty_payload_decodes_as_null() {
        let bytes = raw(Frame {
            id: "a".to_string(),
            kind: FrameKind::Response as i32,
            status: FrameStatus::Ok as i32,
            ..Default::default()
        });

        match decode(&bytes).unwrap() {
            Envelope::Response(response) => assert_eq!(response.outcome, ResponseOutcome::Ok(Value::Null)),
            other => panic!("Expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_request_id_hint() {
        let bad_request = raw(Frame {
            id: "req-9".to_string(),
            kind: FrameKind::Request as i32,
            ..Default::default()
        });
        assert_eq!(request_id_hint(&bad_request), Some("req-9".to_string()));

        let bad_response = raw(Frame {
            id: "req-9".to_string(),
            kind: FrameKind::Response as i32,
            ..Default::default()
        });
        assert_eq!(request_id_hint(&bad_response), None);
        assert_eq!(request_id_hint(&[0xff, 0xff]), None);
    }
}
