// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Protobuf frame carried on the channel.
//!
//! ```text
//! message Frame {
//!   string      id          = 1;
//!   Kind        kind        = 2;
//!   string      operation   = 3;  // requests only
//!   bytes       payload     = 4;  // JSON: request payload or response value
//!   int64       issued_at   = 5;  // requests only, unix millis
//!   Status      status      = 6;  // responses only
//!   ErrorDetail error       = 7;  // responses with status ERROR
//!   int64       duration_ms = 8;  // responses only
//! }
//! ```
//!
//! The messages are declared with the `prost` derives directly so the crate
//! has no protoc build step.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Frame {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(enumeration = "FrameKind", tag = "2")]
    pub kind: i32,
    #[prost(string, tag = "3")]
    pub operation: String,
    #[prost(bytes = "vec", tag = "4")]
    pub payload: Vec<u8>,
    #[prost(int64, tag = "5")]
    pub issued_at: i64,
    #[prost(enumeration = "FrameStatus", tag = "6")]
    pub status: i32,
    #[prost(message, optional, tag = "7")]
    pub error: Option<ErrorDetail>,
    #[prost(int64, tag = "8")]
    pub duration_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorDetail {
    #[prost(string, tag = "1")]
    pub category: String,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FrameKind {
    Unspecified = 0,
    Request = 1,
    Response = 2,
    Cancel = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FrameStatus {
    Unspecified = 0,
    Ok = 1,
    Error = 2,
    Timeout = 3,
}
