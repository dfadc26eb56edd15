#![no_main]

use libfuzzer_sys::fuzz_target;

use ferrite_pipeline::RecordId;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(id) = text.parse::<RecordId>() {
        // Display is canonical: it always parses back to the same id.
        assert_eq!(id.to_string().parse::<RecordId>().ok(), Some(id));
    }
});
