#![no_main]

use libfuzzer_sys::fuzz_target;
use slirc_bot::Message;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(message) = Message::parse(text) {
            // Whatever parses must encode and reparse losslessly.
            let encoded = message.to_string();
            let reparsed = Message::parse(&encoded).expect("encoded message must parse");
            assert_eq!(message, reparsed);
        }
    }
});
