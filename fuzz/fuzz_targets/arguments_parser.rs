#![no_main]

use ctxprof::arguments::Arguments;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Any input must either parse or be rejected, never panic
        if let Ok(args) = Arguments::parse(input) {
            let _ = args.event_name();
            let _ = args.event_interval();
            let _ = args.output_file();
        }
    }
});
