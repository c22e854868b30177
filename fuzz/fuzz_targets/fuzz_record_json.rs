// Copyright (c) 2026 Emberlink
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use emberlink::core::types::InnerRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The inner record parser sits behind decryption, but a peer holding
    // the shared key can still feed it arbitrary JSON.
    if let Ok(record) = serde_json::from_slice::<InnerRecord>(data) {
        let _ = record.validate();
        let _ = serde_json::to_vec(&record);
    }
});
