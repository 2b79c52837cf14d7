#![no_main]

use carebridge_core::{derive_narrow_id, derive_narrow_id_str, parse_wide_id};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Any text either fails to parse or derives the same value as its
        // parsed wide id.
        match derive_narrow_id_str(input) {
            Ok(narrow) => {
                let wide = parse_wide_id(input);
                assert_eq!(wide.map(derive_narrow_id), Ok(narrow));
            }
            Err(_) => assert!(parse_wide_id(input).is_err()),
        }
    }
});
