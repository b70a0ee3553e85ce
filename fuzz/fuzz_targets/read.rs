#![no_main]
use libfuzzer_sys::fuzz_target;
use mpl115a1::{
    mock_utils::{PinNop, ReplaySpi, SleepNop},
    Config, Mpl115a1,
};

fuzz_target!(|input: (f32, &[u8])| {
    let (altitude, data) = input;
    let spi = ReplaySpi::new(data);
    if let Ok(mut barometer) = Mpl115a1::new(spi, PinNop, SleepNop, Config::with_altitude(altitude)) {
        // Readings are likely garbage. We don't care about the result/error
        // just if it crashes or not.
        while barometer.take_readings().is_ok() {}
    }
});
