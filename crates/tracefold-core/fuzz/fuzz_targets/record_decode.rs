#![no_main]
use libfuzzer_sys::fuzz_target;
use tracefold_core::{GrammarRecord, KeyedHeader};

fuzz_target!(|data: &[u8]| {
    let _ = GrammarRecord::from_cbor(data);
    let _ = KeyedHeader::from_cbor(data);
});
