//! # Getting started
//!
//! A platform agnostic driver for the [MPL115A1](https://www.nxp.com/docs/en/data-sheet/MPL115A1.pdf)
//! SPI barometer from NXP.
//!
//! This driver reads the factory calibration coefficients once and then
//! converts the on-chip ADC samples into pressure (kPa) and temperature (°C).
//! The SPI peripheral must be configured with [`MODE`] (polarity 0, phase 0,
//! MSB first) before being handed to the driver.
//!
//! ## Example
//! ```rust
//! # // NOTE: Use real spi, pin and delay instances for your app.
//! # use embedded_hal_mock::spi::{Mock as SpiMock, Transaction as SpiTransaction};
//! # use embedded_hal_mock::pin::{Mock as PinMock, State as PinState, Transaction as PinTransaction};
//! # let spi = SpiMock::new(&[
//! #     SpiTransaction::transfer(
//! #         vec![0x88, 0x00, 0x8A, 0x00, 0x8C, 0x00, 0x8E, 0x00, 0x90, 0x00, 0x92, 0x00, 0x94, 0x00, 0x96, 0x00, 0x00],
//! #         vec![0x00, 0x3E, 0x00, 0xCE, 0x00, 0xB3, 0x00, 0xF9, 0x00, 0xC5, 0x00, 0x17, 0x00, 0x33, 0x00, 0xC8, 0x00],
//! #     ),
//! #     SpiTransaction::write(vec![0x24, 0x00]),
//! #     SpiTransaction::transfer(
//! #         vec![0x80, 0x00, 0x82, 0x00, 0x84, 0x00, 0x86, 0x00, 0x00],
//! #         vec![0x00, 0x66, 0x00, 0x80, 0x00, 0x7E, 0x00, 0xC0, 0x00],
//! #     ),
//! # ]);
//! # let cs = PinMock::new(&[
//! #     PinTransaction::set(PinState::High),
//! #     PinTransaction::set(PinState::Low),
//! #     PinTransaction::set(PinState::High),
//! #     PinTransaction::set(PinState::Low),
//! #     PinTransaction::set(PinState::High),
//! #     PinTransaction::set(PinState::Low),
//! #     PinTransaction::set(PinState::High),
//! # ]);
//! use mpl115a1::{Config, Mpl115a1, mock_utils::SleepNop};
//! // Configure the SPI peripheral with `mpl115a1::MODE`, clocked at
//! // `mpl115a1::DEFAULT_SPI_FREQUENCY_HZ` or below.
//! # let _ = (mpl115a1::MODE, mpl115a1::DEFAULT_SPI_FREQUENCY_HZ);
//! // NOTE: You should implement the DelayMs trait for this driver to work
//! // correctly.
//! let mut barometer = Mpl115a1::new(spi, cs, SleepNop, Config::with_altitude(9.0)).unwrap();
//! println!("{:?}", barometer.take_readings().unwrap());
//! # let (mut spi, mut cs, _) = barometer.release();
//! # spi.done();
//! # cs.done();
//! ```

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

use embedded_hal::{
    blocking::{
        delay::DelayMs,
        spi::{Transfer, Write},
    },
    digital::v2::OutputPin,
    spi::Mode,
};

/// SPI mode required by the sensor: clock idles low, data captured on the
/// first transition, MSB first.
pub const MODE: Mode = embedded_hal::spi::MODE_0;

/// Suggested SPI clock. The device accepts up to 8 MHz.
pub const DEFAULT_SPI_FREQUENCY_HZ: u32 = 2_000_000;

/// Time the device needs between a start-conversion command and the data
/// registers holding a valid sample.
pub const CONVERSION_TIME_MS: u32 = 3;

/// Mock utils is a set of tools to aid in testing and documenting you should not
/// use any of the mocks defined in this module in your release binaries.
pub mod mock_utils {
    use core::convert::Infallible;

    /// A sleep implementation that does nothing and immediately exists. This is
    /// useful for testing and fuzzing.
    pub struct SleepNop;

    impl embedded_hal::blocking::delay::DelayMs<u32> for SleepNop {
        fn delay_ms(&mut self, _ms: u32) {
            // Nop
        }
    }

    /// A chip-select pin that accepts every state change.
    pub struct PinNop;

    impl embedded_hal::digital::v2::OutputPin for PinNop {
        type Error = Infallible;

        fn set_low(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    /// Returned by [`ReplaySpi`] once it has no bytes left to answer with.
    #[derive(Debug, PartialEq, Clone, Copy)]
    pub struct ReplayExhausted;

    /// An SPI transport answering every transfer with the next bytes of a
    /// fixed slice, whatever was sent. Writes consume nothing.
    pub struct ReplaySpi<'a> {
        data: &'a [u8],
    }

    impl<'a> ReplaySpi<'a> {
        /// Replays `data` in order, one transfer at a time.
        pub fn new(data: &'a [u8]) -> Self {
            Self { data }
        }
    }

    impl embedded_hal::blocking::spi::Transfer<u8> for ReplaySpi<'_> {
        type Error = ReplayExhausted;

        fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
            if self.data.len() < words.len() {
                return Err(ReplayExhausted);
            }
            let (head, tail) = self.data.split_at(words.len());
            words.copy_from_slice(head);
            self.data = tail;
            Ok(words)
        }
    }

    impl embedded_hal::blocking::spi::Write<u8> for ReplaySpi<'_> {
        type Error = ReplayExhausted;

        fn write(&mut self, _words: &[u8]) -> Result<(), Self::Error> {
            Ok(())
        }
    }
}


/// Decodes a big-endian register pair into a two's complement value.
///
/// # Example
///
/// ```
/// assert_eq!(mpl115a1::decode_i16(0xFF, 0x7F), 32767);
/// assert_eq!(mpl115a1::decode_i16(0x00, 0x80), -32768);
/// ```
pub const fn decode_i16(lsb: u8, msb: u8) -> i16 {
    i16::from_be_bytes([msb, lsb])
}

/// Normalises a pressure measured `altitude` metres above mean sea level to
/// the equivalent pressure at sea level, in the unit of `pressure`.
pub fn sea_level_pressure(pressure: f32, altitude: f32) -> f32 {
    pressure / libm::powf(1.0 - altitude / 44330.0, 5.255)
}

/// A catch all error for this driver
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError<E, P> {
    SpiError(E),
    PinError(P),
}

type SensorResult<T, SPI, CS> =
    Result<T, SensorError<<SPI as Transfer<u8>>::Error, <CS as OutputPin>::Error>>;

pub trait SpiMarker: Transfer<u8> + Write<u8>
where
    Self: Write<u8, Error = <Self as Transfer<u8>>::Error>,
{
}
impl<T: Transfer<u8> + Write<u8>> SpiMarker for T where
    Self: Write<u8, Error = <Self as Transfer<u8>>::Error>
{
}

/// Register addresses from the datasheet memory map.
mod register {
    pub const PADC_MSB: u8 = 0x00;
    pub const A0_MSB: u8 = 0x04;
    pub const START_CONVERSION: u8 = 0x12;
}

/// A command byte to send to the sensor.
#[derive(Clone, Copy)]
enum Command {
    Read(u8),
    Write(u8),
}

impl Command {
    const fn opcode(self) -> u8 {
        match self {
            Command::Read(address) => 0x80 | (address << 1),
            Command::Write(address) => (address << 1) & 0x7F,
        }
    }
}

/// Reads of consecutive registers starting at `first`, each opcode followed
/// by a dummy byte, with a trailing dummy byte closing the sequence.
const fn read_sequence<const N: usize>(first: u8) -> [u8; N] {
    let mut buffer = [0u8; N];
    let mut index = 0;
    while 2 * index + 1 < N {
        buffer[2 * index] = Command::Read(first + index as u8).opcode();
        index += 1;
    }
    buffer
}

const CMD_READ_COEFFICIENTS: [u8; 17] = read_sequence(register::A0_MSB);
const CMD_START_CONVERSION: [u8; 2] = [Command::Write(register::START_CONVERSION).opcode(), 0x00];
const CMD_READ_DATA: [u8; 9] = read_sequence(register::PADC_MSB);

/// Driver configuration.
#[derive(Debug, PartialEq, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Height of the sensor above mean sea level in metres. Only used to
    /// derive the sea level pressure.
    pub altitude: f32,
}

impl Config {
    pub fn with_altitude(altitude: f32) -> Self {
        Self { altitude }
    }
}

/// The coefficient registers as stored in the device, sign extended.
#[derive(Debug, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawCoefficients {
    pub a0: i16,
    pub b1: i16,
    pub b2: i16,
    pub c12: i16,
}

impl RawCoefficients {
    /// Decodes the response to the coefficient read sequence. Each byte is
    /// clocked out during the dummy byte following its opcode.
    pub fn from_response(response: &[u8; 17]) -> Self {
        let pair = |k: usize| decode_i16(response[4 * k + 3], response[4 * k + 1]);
        Self {
            a0: pair(0),
            b1: pair(1),
            b2: pair(2),
            c12: pair(3),
        }
    }

    /// Converts the fixed-point registers into their real values.
    pub fn scale(&self) -> CalibrationCoefficients {
        CalibrationCoefficients {
            a0: self.a0 as f32 / 8.0,
            b1: self.b1 as f32 / 8192.0,
            b2: self.b2 as f32 / 16384.0,
            c12: self.c12 as f32 / 16777216.0,
        }
    }
}

/// The factory calibration coefficients.
#[derive(Debug, PartialEq, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationCoefficients {
    /// Pressure offset
    pub a0: f32,
    /// Pressure sensitivity
    pub b1: f32,
    /// Temperature coefficient of offset
    pub b2: f32,
    /// Temperature coefficient of sensitivity
    pub c12: f32,
}

impl CalibrationCoefficients {
    /// Compensates a raw sample, normalising the pressure for a sensor
    /// mounted at `altitude` metres.
    pub fn compensate(&self, raw: RawReading, altitude: f32) -> CompensatedReading {
        let padc = raw.padc as f32;
        let tadc = raw.tadc as f32;

        let pcomp = self.a0 + (self.b1 + self.c12 * tadc) * padc + self.b2 * tadc;
        let pressure = pcomp * ((1150.0 - 500.0) / 1023.0) + 500.0;

        CompensatedReading {
            temperature: 25.0 - (tadc - 512.0) / 5.35,
            pressure,
            sea_level_pressure: sea_level_pressure(pressure, altitude),
        }
    }
}

/// The 10 bit pressure and temperature ADC samples.
#[derive(Debug, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawReading {
    pub padc: u16,
    pub tadc: u16,
}

impl RawReading {
    /// Decodes the response to the data read sequence. The samples are left
    /// aligned in their 16 bit register pairs.
    pub fn from_response(response: &[u8; 9]) -> Self {
        Self {
            padc: u16::from_be_bytes([response[1], response[3]]) >> 6,
            tadc: u16::from_be_bytes([response[5], response[7]]) >> 6,
        }
    }
}

/// A compensated sample. Pressure is in kPa, temperature in deg C.
///
/// There is no integrity check in the protocol, so miswiring or bus noise
/// shows up as implausible values rather than as an error.
///
/// Values are single precision, so they may differ from a double precision
/// evaluation of the same formula in the last digits.
#[derive(Debug, PartialEq, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CompensatedReading {
    pub temperature: f32,
    /// Pressure at the configured altitude.
    pub pressure: f32,
    /// Pressure normalised to mean sea level.
    pub sea_level_pressure: f32,
}

/// Runs `exchange` with the chip selected. The chip is deselected on every
/// exit path; a failed exchange takes precedence over a failed release.
fn with_chip_selected<SPI, CS, E, F>(
    spi: &mut SPI,
    cs: &mut CS,
    exchange: F,
) -> Result<(), SensorError<E, CS::Error>>
where
    CS: OutputPin,
    F: FnOnce(&mut SPI) -> Result<(), E>,
{
    if let Err(e) = cs.set_low() {
        let _ = cs.set_high();
        return Err(SensorError::PinError(e));
    }
    let exchanged = exchange(spi).map_err(SensorError::SpiError);
    let released = cs.set_high().map_err(SensorError::PinError);
    exchanged?;
    released
}

/// An initialised MPL115A1.
pub struct Mpl115a1<SPI: SpiMarker, CS: OutputPin, D: DelayMs<u32>> {
    spi: SPI,
    cs: CS,
    delay: D,
    config: Config,
    coefficients: CalibrationCoefficients,
    reading: CompensatedReading,
}

impl<SPI: SpiMarker, CS: OutputPin, D: DelayMs<u32>> Mpl115a1<SPI, CS, D> {
    /// Creates the driver and reads the factory calibration coefficients.
    ///
    /// # Errors
    /// Construction fails if there was a problem communicating over spi or
    /// driving the chip-select pin. The peripherals are dropped in that case.
    ///
    /// # Example
    ///
    /// ```
    /// // NOTE: Use real spi and pin instances for your app.
    /// use embedded_hal_mock::spi::{Mock as SpiMock, Transaction as SpiTransaction};
    /// use embedded_hal_mock::pin::{Mock as PinMock, State as PinState, Transaction as PinTransaction};
    /// use mpl115a1::{Config, Mpl115a1, mock_utils::SleepNop};
    /// let spi = SpiMock::new(&[SpiTransaction::transfer(
    ///     vec![0x88, 0x00, 0x8A, 0x00, 0x8C, 0x00, 0x8E, 0x00, 0x90, 0x00, 0x92, 0x00, 0x94, 0x00, 0x96, 0x00, 0x00],
    ///     vec![0x00; 17],
    /// )]);
    /// let cs = PinMock::new(&[
    ///     PinTransaction::set(PinState::High),
    ///     PinTransaction::set(PinState::Low),
    ///     PinTransaction::set(PinState::High),
    /// ]);
    /// let barometer = Mpl115a1::new(spi, cs, SleepNop, Config::default()).unwrap();
    /// let (mut spi, mut cs, _) = barometer.release();
    /// spi.done();
    /// cs.done();
    /// ```
    pub fn new(
        mut spi: SPI,
        mut cs: CS,
        delay: D,
        config: Config,
    ) -> SensorResult<Self, SPI, CS> {
        cs.set_high().map_err(SensorError::PinError)?;

        let mut response = CMD_READ_COEFFICIENTS;
        with_chip_selected(&mut spi, &mut cs, |spi| {
            spi.transfer(&mut response).map(|_| ())
        })?;
        let coefficients = RawCoefficients::from_response(&response).scale();

        #[cfg(feature = "defmt")]
        defmt::trace!("mpl115a1 coefficients {}", coefficients);

        Ok(Self {
            spi,
            cs,
            delay,
            config,
            coefficients,
            reading: CompensatedReading::default(),
        })
    }

    /// Release the spi, chip-select and delay handles consuming the driver.
    pub fn release(self) -> (SPI, CS, D) {
        (self.spi, self.cs, self.delay)
    }

    // Starts a conversion, waits for it to complete and reads both ADCs.
    fn read_raw_adc(&mut self) -> SensorResult<RawReading, SPI, CS> {
        with_chip_selected(&mut self.spi, &mut self.cs, |spi| {
            spi.write(&CMD_START_CONVERSION)
        })?;
        self.delay.delay_ms(CONVERSION_TIME_MS);

        let mut response = CMD_READ_DATA;
        with_chip_selected(&mut self.spi, &mut self.cs, |spi| {
            spi.transfer(&mut response).map(|_| ())
        })?;
        Ok(RawReading::from_response(&response))
    }

    /// Samples the sensor and stores the compensated reading.
    ///
    /// This blocks for [`CONVERSION_TIME_MS`] between the start of the
    /// conversion and the data read.
    ///
    /// # Errors
    /// This may return an error if there is a problem with spi communication.
    /// The previously stored reading is kept in that case.
    pub fn take_readings(&mut self) -> SensorResult<CompensatedReading, SPI, CS> {
        let raw = self.read_raw_adc()?;
        self.reading = self.coefficients.compensate(raw, self.config.altitude);

        #[cfg(feature = "defmt")]
        defmt::trace!("mpl115a1 {} -> {}", raw, self.reading);

        Ok(self.reading)
    }

    /// The most recent reading, all zeros before the first one.
    pub fn last_reading(&self) -> CompensatedReading {
        self.reading
    }

    /// Last measured temperature in deg C.
    pub fn temperature(&self) -> f32 {
        self.reading.temperature
    }

    /// Last measured pressure at the sensor's altitude in kPa.
    pub fn pressure(&self) -> f32 {
        self.reading.pressure
    }

    /// Last measured pressure normalised to mean sea level in kPa.
    pub fn sea_level_pressure(&self) -> f32 {
        self.reading.sea_level_pressure
    }

    /// Scaled calibration coefficients read at construction.
    pub fn coefficients(&self) -> &CalibrationCoefficients {
        &self.coefficients
    }

    /// Configuration the driver was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }
}
