#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(Some((_, consumed))) = ferry::codec::decode_request(data, 4096) {
        assert!(consumed <= data.len());
    }
});
