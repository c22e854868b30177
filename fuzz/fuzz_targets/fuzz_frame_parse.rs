// Copyright (c) 2026 Emberlink
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![no_main]
#![forbid(unsafe_code)]

use emberlink::core::codec::Frame;
use emberlink::core::types::NetworkKey;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parsing and opening arbitrary radio bytes must never panic; a
    // hostile frame that passes the CRC must still fail closed at the
    // payload envelope.
    if let Ok(frame) = Frame::parse(data) {
        let _ = frame.open(&NetworkKey::from_bytes(b"fuzz network key"));
        let reencoded = frame.to_bytes();
        assert_eq!(Frame::parse(&reencoded).ok().as_ref(), Some(&frame));
    }
});
