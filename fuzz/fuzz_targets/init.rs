#![no_main]
use libfuzzer_sys::fuzz_target;
use mpl115a1::{
    mock_utils::{PinNop, ReplaySpi, SleepNop},
    Config, Mpl115a1,
};

fuzz_target!(|data: &[u8]| {
    let spi = ReplaySpi::new(data);
    // We ignore the result/error as we only care about potential crashes.
    let _ = Mpl115a1::new(spi, PinNop, SleepNop, Config::default());
});
