#![no_main]
use libfuzzer_sys::fuzz_target;
use tracefold_core::RepetitionCompressor;

// Small alphabet so repeats are common.
fuzz_target!(|data: &[u8]| {
    let input: Vec<u32> = data.iter().map(|b| u32::from(b % 4)).collect();
    let Ok(mut trace) = RepetitionCompressor::new().compress_vec(input.clone()) else {
        return;
    };
    assert!(trace.base().len() <= input.len());
    assert_eq!(trace.reconstruct().ok(), Some(input));
});
