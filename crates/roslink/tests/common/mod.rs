// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Message types and helpers shared by the integration tests.
//!
//! The `Message` impls here stand in for what the external schema code
//! generator would emit.

// Each test binary uses a subset of these helpers
#![allow(dead_code)]

use roslink::error::Result;
use roslink::msg::{Message, WireReader, WireWriter};
use std::time::{Duration, Instant};

/// Opaque byte payload; serializes to exactly its own bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob(pub Vec<u8>);

impl Message for Blob {
    fn data_type() -> String {
        "test_msgs/Blob".to_string()
    }
    fn md5sum() -> String {
        "abc123".to_string()
    }
    fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0);
    }
    fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(Self(bytes.to_vec()))
    }
}

/// Fibonacci-style action goal: how many steps to run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FibGoal(pub u32);

/// Final value of the computation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FibResult(pub u32);

/// One intermediate value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FibFeedback(pub u32);

macro_rules! impl_u32_message {
    ($name:ident, $type_str:expr, $md5:expr) => {
        impl Message for $name {
            fn data_type() -> String {
                $type_str.to_string()
            }
            fn md5sum() -> String {
                $md5.to_string()
            }
            fn serialize(&self, buf: &mut Vec<u8>) {
                WireWriter::new(buf).put_u32(self.0);
            }
            fn deserialize(bytes: &[u8]) -> Result<Self> {
                Ok(Self(WireReader::new(bytes).get_u32()?))
            }
        }
    };
}

impl_u32_message!(FibGoal, "test_msgs/FibGoal", "f1b601");
impl_u32_message!(FibResult, "test_msgs/FibResult", "f1b602");
impl_u32_message!(FibFeedback, "test_msgs/FibFeedback", "f1b603");

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
