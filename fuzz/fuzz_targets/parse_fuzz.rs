//! ER7 fuzz target: feed arbitrary text to the message parser and serialize whatever
//! it accepts. Neither step may panic.
//! Build with: cargo fuzz run parse_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    let config = match hl7er7::Config::global() {
        Ok(c) => c,
        Err(_) => return,
    };
    if let Ok(message) = hl7er7::parse_message(s, config) {
        let _ = message.to_er7();
        let _ = message.validation_report();
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run parse_fuzz");
}
