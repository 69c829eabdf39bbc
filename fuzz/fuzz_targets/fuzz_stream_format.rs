//! Fuzz target: `StreamFormat` parsing
//!
//! Arbitrary UTF-8 format strings must parse or fail cleanly; accepted
//! formats always name exactly one data type.
//!
//! cargo fuzz run fuzz_stream_format

#![no_main]

use cloudlink::datapoints::{DataPointCollection, StreamFormat};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(format) = std::str::from_utf8(data) else {
        return;
    };
    let parsed = format.parse::<StreamFormat>();

    let collection = DataPointCollection::new();
    let declared = collection.add_stream("fuzz", format);
    assert_eq!(parsed.is_ok(), declared.is_ok());
});
