//! Driver for the EM Microelectronic EM4095 125 kHz RFID analog front end
//!
//! The chip is controlled through three GPIO lines: SHD puts it to sleep, MOD modulates the
//! carrier and DEMOD_OUT carries the demodulated tag signal. Transfers are clocked by a GPIO
//! interrupt which has to call [`Em4095::irq_handler`]; every `div` interrupts the driver either
//! samples DEMOD_OUT or outputs the next bit on MOD.
//!
//! The driver hands out raw level samples with their timing, decoding the tag protocol is left
//! to the caller.
#![no_std]

mod fmt;

pub mod basic;
pub mod clock;
mod error;
mod info;
#[cfg(test)]
mod mock;
pub mod selftest;

pub use clock::{Clock, Timestamp};
pub use error::{Error, Line};
pub use info::{info, Info};

use bitvec::prelude::*;
use embedded_hal::digital::{InputPin, OutputPin, PinState};
use fugit::MicrosDurationU32;
use heapless::Vec;

/// Capacity of the decode buffer, in samples
pub const MAX_LENGTH: usize = 384;

/// Samples further apart than this restart a read
pub const GAP_RESET: MicrosDurationU32 = MicrosDurationU32::millis(200);

const NO_DIFF: MicrosDurationU32 = MicrosDurationU32::from_ticks(0);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Mode {
    #[default]
    Idle = 0,
    Read = 1,
    Write = 2,
}

/// One level sampled from DEMOD_OUT, or output on MOD
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sample {
    pub time: Timestamp,
    pub level: PinState,
    /// Time until the next sample, zero for the last one
    pub diff: MicrosDurationU32,
}

/// A completed transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Event {
    pub mode: Mode,
    pub len: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Interrupts per sample, can't be 0
    pub div: u32,
    /// See [`GAP_RESET`]
    pub gap_reset: MicrosDurationU32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            div: 1,
            gap_reset: GAP_RESET,
        }
    }
}

/// The GPIO lines wired to the chip
pub struct Pins<SHD, MOD, DEMOD> {
    pub shd: SHD,
    pub modulation: MOD,
    pub demod: DEMOD,
}

pub struct Em4095<SHD, MOD, DEMOD, C> {
    pins: Pins<SHD, MOD, DEMOD>,
    clock: C,
    samples: Vec<Sample, MAX_LENGTH>,
    mode: Mode,
    /// Requested sample count when reading, output cursor when writing
    len: usize,
    div: u32,
    div_count: u32,
    synced: bool,
    last_level: PinState,
    last_time: Timestamp,
    gap_reset: MicrosDurationU32,
    event: Option<Event>,
}

impl<SHD, MOD, DEMOD, C> Em4095<SHD, MOD, DEMOD, C>
where
    SHD: OutputPin,
    MOD: OutputPin,
    DEMOD: InputPin,
    C: Clock,
{
    /// Takes ownership of the pins and clock and puts the chip to sleep
    pub fn init(pins: Pins<SHD, MOD, DEMOD>, clock: C) -> Result<Self, Error> {
        Self::init_with_config(pins, clock, Config::default())
    }

    pub fn init_with_config(
        pins: Pins<SHD, MOD, DEMOD>,
        clock: C,
        config: Config,
    ) -> Result<Self, Error> {
        if config.div == 0 {
            error!("em4095: div can't be 0.");
            return Err(Error::InvalidDivider);
        }
        let mut drv = Self {
            pins,
            clock,
            samples: Vec::new(),
            mode: Mode::Idle,
            len: 0,
            div: config.div,
            div_count: 0,
            synced: false,
            last_level: PinState::Low,
            last_time: Timestamp::from_ticks(0),
            gap_reset: config.gap_reset,
            event: None,
        };
        drv.shd_write(PinState::High)?;
        drv.last_time = drv.now()?;
        debug!("em4095: initialized, div {=u32}", drv.div);
        Ok(drv)
    }

    /// Puts the chip to sleep and gives back the pins and clock
    pub fn deinit(mut self) -> Result<(Pins<SHD, MOD, DEMOD>, C), Error> {
        self.shd_write(PinState::High)?;
        Ok((self.pins, self.clock))
    }

    /// Run a function with access to the clock
    pub fn with_clock<R>(&mut self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.clock)
    }

    /// Switches the chip and the RF field on
    pub fn power_on(&mut self) -> Result<(), Error> {
        self.shd_write(PinState::Low)
    }

    /// Puts the chip to sleep
    pub fn power_down(&mut self) -> Result<(), Error> {
        self.shd_write(PinState::High)
    }

    /// Puts the chip to sleep and drops an armed transfer
    ///
    /// Later interrupts are ignored until the next [`read`](Self::read) or
    /// [`write`](Self::write). Samples taken so far stay available.
    pub fn abort(&mut self) -> Result<(), Error> {
        self.mode = Mode::Idle;
        self.synced = false;
        self.div_count = 0;
        self.event = None;
        self.power_down()
    }

    pub fn set_div(&mut self, div: u32) -> Result<(), Error> {
        if div == 0 {
            error!("em4095: div can't be 0.");
            return Err(Error::InvalidDivider);
        }
        self.div = div;
        Ok(())
    }

    pub fn div(&self) -> u32 {
        self.div
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// A transfer is armed and hasn't completed yet
    pub fn is_busy(&self) -> bool {
        self.mode != Mode::Idle
    }

    /// Samples of the current or last transfer
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Returns the last completion event, if it wasn't taken yet
    pub fn take_event(&mut self) -> Option<Event> {
        self.event.take()
    }

    /// Arms a read of `len` samples
    ///
    /// Sampling starts at the first level change on DEMOD_OUT after the chip is powered on.
    pub fn read(&mut self, len: usize) -> Result<(), Error> {
        check_len(len)?;
        let now = self.now()?;
        self.mod_write(PinState::Low)?;
        self.last_time = now;
        self.samples.clear();
        self.len = len;
        self.div_count = 0;
        self.mode = Mode::Read;
        self.synced = false;
        self.event = None;
        self.last_level = self.demod_read()?;
        trace!("em4095: read {=usize} samples armed", len);
        Ok(())
    }

    /// Arms a write of `levels`, any non-zero byte is a high level
    pub fn write(&mut self, levels: &[u8]) -> Result<(), Error> {
        self.start_write(levels.iter().map(|&l| l != 0), levels.len())
    }

    /// Arms a write of `bits`
    pub fn write_bits(&mut self, bits: &BitSlice<u8, Msb0>) -> Result<(), Error> {
        self.start_write(bits.iter().by_vals(), bits.len())
    }

    fn start_write(&mut self, levels: impl Iterator<Item = bool>, len: usize) -> Result<(), Error> {
        check_len(len)?;
        let now = self.now()?;
        self.mod_write(PinState::Low)?;
        self.last_time = now;
        self.samples.clear();
        // length checked above, can't overflow
        self.samples.extend(levels.map(|level| Sample {
            time: now,
            level: level.into(),
            diff: NO_DIFF,
        }));
        self.len = 0;
        self.div_count = 0;
        self.mode = Mode::Write;
        self.synced = false;
        self.event = None;
        self.last_level = PinState::Low;
        trace!("em4095: write {=usize} bits armed", len);
        Ok(())
    }

    /// Copies the sampled levels into `buf` as `0`/`1` bytes, returns the number of samples
    pub fn copy_decode_buffer(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let required = self.samples.len();
        let out = buf
            .get_mut(..required)
            .ok_or(Error::BufferTooSmall { required })?;
        for (o, s) in out.iter_mut().zip(&self.samples) {
            *o = (s.level == PinState::High) as u8;
        }
        Ok(required)
    }

    /// Packs the sampled levels into `bits`, returns the number of samples
    pub fn copy_decode_bits(&self, bits: &mut BitSlice<u8, Msb0>) -> Result<usize, Error> {
        let required = self.samples.len();
        let out = bits.get_mut(..required).ok_or(Error::BufferTooSmall {
            required: required.div_ceil(8),
        })?;
        for (i, s) in self.samples.iter().enumerate() {
            out.set(i, s.level == PinState::High);
        }
        Ok(required)
    }

    /// Handles one clock interrupt
    ///
    /// Returns the completion event when this interrupt finished the transfer. The chip is put
    /// back to sleep at that point.
    pub fn irq_handler(&mut self) -> Result<Option<Event>, Error> {
        match self.mode {
            Mode::Read => {
                if !self.read_sync()? {
                    return Ok(None);
                }
                let now = self.now()?;
                let level = self.demod_read()?;

                if clock::micros_between(self.last_time, now) >= self.gap_reset {
                    trace!("em4095: sample gap, restarting read");
                    self.samples.clear();
                }
                let sample = Sample {
                    time: now,
                    level,
                    diff: NO_DIFF,
                };
                if self.samples.is_full() {
                    self.samples.clear();
                }
                self.samples
                    .push(sample)
                    .map_err(|_| Error::InvalidLength {
                        len: self.len,
                        max: MAX_LENGTH,
                    })?;
                self.last_time = now;

                if self.samples.len() >= self.len {
                    return self.finish().map(Some);
                }
            }
            Mode::Write => {
                if !self.divide() {
                    return Ok(None);
                }
                let now = self.now()?;
                let level = match self.samples.get_mut(self.len) {
                    Some(sample) => {
                        sample.time = now;
                        sample.level
                    }
                    None => return self.finish().map(Some),
                };
                self.len += 1;
                if level != self.last_level {
                    self.mod_write(level)?;
                }
                self.last_level = level;

                if self.len >= self.samples.len() {
                    return self.finish().map(Some);
                }
            }
            Mode::Idle => (),
        }
        Ok(None)
    }

    /// Waits for the first edge on DEMOD_OUT, then divides the interrupt clock
    fn read_sync(&mut self) -> Result<bool, Error> {
        if !self.synced {
            let level = self.demod_read()?;
            if level == self.last_level {
                return Ok(false);
            }
            self.last_level = level;
            self.synced = true;
        }
        Ok(self.divide())
    }

    fn divide(&mut self) -> bool {
        self.div_count += 1;
        if self.div_count >= self.div {
            self.div_count = 0;
            true
        } else {
            false
        }
    }

    fn finish(&mut self) -> Result<Event, Error> {
        self.shd_write(PinState::High)?;
        compute_diffs(&mut self.samples);
        let event = Event {
            mode: self.mode,
            len: self.samples.len(),
        };
        debug!("em4095: {} done, {=usize} samples", event.mode, event.len);
        self.mode = Mode::Idle;
        self.event = Some(event);
        Ok(event)
    }

    fn now(&mut self) -> Result<Timestamp, Error> {
        self.clock.now().map_err(|_| {
            error!("em4095: timestamp read failed.");
            Error::Clock
        })
    }

    fn shd_write(&mut self, state: PinState) -> Result<(), Error> {
        self.pins.shd.set_state(state).map_err(|e| {
            error!("em4095: shd gpio write failed.");
            Error::gpio(Line::Shd, e)
        })
    }

    fn mod_write(&mut self, state: PinState) -> Result<(), Error> {
        self.pins.modulation.set_state(state).map_err(|e| {
            error!("em4095: mod gpio write failed.");
            Error::gpio(Line::Mod, e)
        })
    }

    fn demod_read(&mut self) -> Result<PinState, Error> {
        self.pins
            .demod
            .is_high()
            .map(PinState::from)
            .map_err(|e| {
                error!("em4095: demod gpio read failed.");
                Error::gpio(Line::Demod, e)
            })
    }
}

fn check_len(len: usize) -> Result<(), Error> {
    if len == 0 || len > MAX_LENGTH {
        error!("em4095: len {=usize} not in 1..={=usize}.", len, MAX_LENGTH);
        return Err(Error::InvalidLength {
            len,
            max: MAX_LENGTH,
        });
    }
    Ok(())
}

/// Stores in each sample the time to the next one
fn compute_diffs(samples: &mut [Sample]) {
    for i in 1..samples.len() {
        samples[i - 1].diff = clock::micros_between(samples[i - 1].time, samples[i].time);
    }
    if let Some(last) = samples.last_mut() {
        last.diff = NO_DIFF;
    }
}
