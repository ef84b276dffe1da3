// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message envelopes and their wire representation.
//!
//! `envelope` holds the typed messages the rest of the crate works with,
//! `wire` the protobuf frame they travel in, and `codec` the conversion
//! between the two plus the length-delimited framing used on the channel.

pub mod codec;
pub mod envelope;
pub mod wire;

pub use codec::{decode, encode, frame_codec, request_id_hint, MAX_FRAME_LENGTH};
pub use envelope::{
    unix_millis, CancelEnvelope, Envelope, EnvelopeKind, RequestEnvelope, ResponseEnvelope,
    ResponseOutcome, Status,
};
