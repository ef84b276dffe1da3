// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod backends;      // operation handlers + the wasm sandbox
pub mod config;        // config + runtime assembly
pub mod engine;        // correlation, dispatch, connections
pub mod errors;        // error handling
pub mod observability;
pub mod protocol;      // envelopes and framing
pub mod traits;        // handler and datastore seams
pub mod transport;     // tcp listener and dialer
