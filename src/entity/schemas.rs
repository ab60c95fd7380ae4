//! Concrete sample types the gateway knows how to move end to end.
//!
//! The original type registry (`type_traits.hpp`, `sample_factory.hpp`)
//! specializes a handful of message structs generated from IDL; only two
//! of those specializations survive in the retrieved source
//! (`StringMsg`, `AlarmMsg`), so those are the two schemas this registry
//! carries. Each is plain data with a `serde` round trip to JSON, which
//! is all [`crate::entity::AnyValue`] needs to bridge CBOR request
//! payloads to and from typed samples.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringMsg {
  pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmMsg {
  pub code: i32,
  pub message: String,
}
