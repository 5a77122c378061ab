//! On-target read/write exercise
//!
//! Arms reads and writes back to back through [`Basic`] and checks that the clock interrupt
//! completes each of them in time. Needs the chip, an antenna and the interrupt wired to
//! [`basic::irq_handler`](crate::basic::irq_handler).
use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin, PinState},
};
use heapless::Vec;
use rand_core::RngCore;

use crate::{basic::Basic, info, Clock, Error, Mode, Pins, Sample, MAX_LENGTH};

/// Clock divider used during the test
pub const TEST_DIV: u32 = 64;
/// Samples taken by each read
pub const READ_LEN: usize = 128;
/// Random bits sent by each write
pub const WRITE_LEN: usize = 32;

fn on_receive(mode: Mode, samples: &[Sample]) {
    match mode {
        Mode::Read => info!("em4095: irq read done, {=usize} samples.", samples.len()),
        Mode::Write => info!("em4095: irq write done, {=usize} bits.", samples.len()),
        Mode::Idle => {
            warn!("em4095: irq unknown mode.");
            return;
        }
    }
    let levels: Vec<u8, MAX_LENGTH> = samples
        .iter()
        .map(|s| (s.level == PinState::High) as u8)
        .collect();
    debug!("raw data: {=[u8]:x}", &levels[..]);
}

/// Runs `times` reads followed by `times` writes of random bits
///
/// The driver is initialized and released by the test, the pins and clock are given back on
/// success.
pub fn read_write_test<SHD, MOD, DEMOD, C, D, R>(
    basic: &mut Basic<'_, SHD, MOD, DEMOD, C, D>,
    pins: Pins<SHD, MOD, DEMOD>,
    clock: C,
    times: u32,
    rng: &mut R,
) -> Result<(Pins<SHD, MOD, DEMOD>, C), Error>
where
    SHD: OutputPin,
    MOD: OutputPin,
    DEMOD: InputPin,
    C: Clock,
    D: DelayNs,
    R: RngCore,
{
    let chip = info();
    info!(
        "em4095: chip is {=str}, driver version {=u32}.",
        chip.chip_name,
        chip.driver_version
    );

    basic.init(pins, clock, Some(on_receive))?;
    info!("em4095: start read write test.");

    let res = run(basic, times, rng);
    let parts = basic.deinit();
    res?;

    info!("em4095: finish read write test.");
    parts?.ok_or(Error::NotInitialized)
}

fn run<SHD, MOD, DEMOD, C, D, R>(
    basic: &mut Basic<'_, SHD, MOD, DEMOD, C, D>,
    times: u32,
    rng: &mut R,
) -> Result<(), Error>
where
    SHD: OutputPin,
    MOD: OutputPin,
    DEMOD: InputPin,
    C: Clock,
    D: DelayNs,
    R: RngCore,
{
    basic.set_div(TEST_DIV)?;

    info!("em4095: read test.");
    let mut rx = [0u8; READ_LEN];
    for _ in 0..times {
        basic.read(&mut rx, READ_LEN).inspect_err(|_| {
            error!("em4095: read failed.");
        })?;
    }

    info!("em4095: write test.");
    let mut tx = [0u8; WRITE_LEN];
    for _ in 0..times {
        tx.iter_mut().for_each(|b| *b = (rng.next_u32() % 2) as u8);
        debug!("write buffer: {=[u8]}", &tx[..]);
        basic.write(&tx).inspect_err(|_| {
            error!("em4095: write failed.");
        })?;
    }
    Ok(())
}
