// Copyright (c) 2026 Emberlink
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use emberlink::networking::transport::AdvertFrame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Advertisement blobs come straight off the air.
    if let Some(frame) = AdvertFrame::parse(data) {
        // A parsed frame re-encodes into a parseable blob.
        let _ = AdvertFrame::parse(&frame.encode());
    }
});
