//! Blocking transfers on top of the interrupt driven driver
//!
//! The driver lives in a [`Shared`] slot so the GPIO interrupt can reach it through
//! [`irq_handler`] while [`Basic`] arms transfers and polls for their completion:
//!
//! ```ignore
//! static EM4095: Shared<Shd, Mod, Demod, Tim> = Mutex::new(RefCell::new(Slot::new()));
//!
//! #[interrupt]
//! fn EXTI0() {
//!     let _ = em4095::basic::irq_handler(&EM4095);
//! }
//! ```
use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};

use crate::{Clock, Em4095, Error, Event, Mode, Pins, Sample};

/// Clock divider set by [`Basic::init`]
pub const DEFAULT_DIV: u32 = 64;
/// Completion checks before a transfer times out
pub const TIMEOUT_POLLS: u32 = 500;
pub const POLL_INTERVAL_MS: u32 = 10;

/// Called from the interrupt when a transfer completes
pub type Callback = fn(Mode, &[Sample]);

pub struct Slot<SHD, MOD, DEMOD, C> {
    driver: Option<Em4095<SHD, MOD, DEMOD, C>>,
    callback: Option<Callback>,
}

impl<SHD, MOD, DEMOD, C> Slot<SHD, MOD, DEMOD, C> {
    pub const fn new() -> Self {
        Self {
            driver: None,
            callback: None,
        }
    }
}

impl<SHD, MOD, DEMOD, C> Default for Slot<SHD, MOD, DEMOD, C> {
    fn default() -> Self {
        Self::new()
    }
}

pub type Shared<SHD, MOD, DEMOD, C> = Mutex<RefCell<Slot<SHD, MOD, DEMOD, C>>>;

/// Runs the driver's interrupt handler, to be called from the GPIO interrupt
///
/// Invokes the registered callback when the interrupt completes a transfer.
pub fn irq_handler<SHD, MOD, DEMOD, C>(
    shared: &Shared<SHD, MOD, DEMOD, C>,
) -> Result<Option<Event>, Error>
where
    SHD: OutputPin,
    MOD: OutputPin,
    DEMOD: InputPin,
    C: Clock,
{
    critical_section::with(|cs| {
        let mut slot = shared.borrow_ref_mut(cs);
        let slot = &mut *slot;
        let driver = slot.driver.as_mut().ok_or(Error::NotInitialized)?;
        let event = driver.irq_handler()?;
        if let (Some(event), Some(callback)) = (event, slot.callback) {
            callback(event.mode, driver.samples());
        }
        Ok(event)
    })
}

pub struct Basic<'a, SHD, MOD, DEMOD, C, D> {
    shared: &'a Shared<SHD, MOD, DEMOD, C>,
    delay: D,
}

impl<'a, SHD, MOD, DEMOD, C, D> Basic<'a, SHD, MOD, DEMOD, C, D>
where
    SHD: OutputPin,
    MOD: OutputPin,
    DEMOD: InputPin,
    C: Clock,
    D: DelayNs,
{
    pub fn new(shared: &'a Shared<SHD, MOD, DEMOD, C>, delay: D) -> Self {
        Self { shared, delay }
    }

    /// Initializes the driver with [`DEFAULT_DIV`], leaves the chip asleep and stores the driver
    /// in the shared slot
    pub fn init(
        &mut self,
        pins: Pins<SHD, MOD, DEMOD>,
        clock: C,
        callback: Option<Callback>,
    ) -> Result<(), Error> {
        let mut driver = Em4095::init(pins, clock).inspect_err(|_| {
            error!("em4095: init failed.");
        })?;
        if let Err(e) = driver.set_div(DEFAULT_DIV) {
            error!("em4095: set div failed.");
            let _ = driver.deinit();
            return Err(e);
        }
        if let Err(e) = driver.power_down() {
            error!("em4095: power down failed.");
            let _ = driver.deinit();
            return Err(e);
        }
        critical_section::with(|cs| {
            let mut slot = self.shared.borrow_ref_mut(cs);
            slot.driver = Some(driver);
            slot.callback = callback;
        });
        Ok(())
    }

    /// Takes the driver out of the shared slot and puts the chip to sleep
    ///
    /// Returns `None` if the slot was empty.
    pub fn deinit(&mut self) -> Result<Option<(Pins<SHD, MOD, DEMOD>, C)>, Error> {
        let driver = critical_section::with(|cs| {
            let mut slot = self.shared.borrow_ref_mut(cs);
            slot.callback = None;
            slot.driver.take()
        });
        driver.map(Em4095::deinit).transpose()
    }

    pub fn set_div(&mut self, div: u32) -> Result<(), Error> {
        self.with_driver(|d| d.set_div(div))
    }

    /// Reads `len` samples into `buf` as `0`/`1` levels
    pub fn read(&mut self, buf: &mut [u8], len: usize) -> Result<(), Error> {
        if buf.len() < len {
            error!("em4095: buffer is too small.");
            return Err(Error::BufferTooSmall { required: len });
        }
        self.with_driver(|d| {
            d.read(len)?;
            d.power_on()
        })?;
        self.wait_for_completion()?;
        let actual = self.with_driver(|d| d.copy_decode_buffer(buf))?;
        if actual != len {
            return Err(Error::LengthMismatch {
                expected: len,
                actual,
            });
        }
        Ok(())
    }

    /// Writes `levels` on the modulation line, any non-zero byte is a high level
    pub fn write(&mut self, levels: &[u8]) -> Result<(), Error> {
        self.with_driver(|d| {
            d.write(levels)?;
            d.power_on()
        })?;
        self.wait_for_completion().map(|_| ())
    }

    fn wait_for_completion(&mut self) -> Result<Event, Error> {
        for _ in 0..TIMEOUT_POLLS {
            if let Some(event) = self.with_driver(|d| Ok(d.take_event()))? {
                return Ok(event);
            }
            self.delay.delay_ms(POLL_INTERVAL_MS);
        }
        warn!("em4095: transfer timed out.");
        // the interrupt never finished the transfer, so the field is still on
        let _ = self.with_driver(|d| d.abort());
        Err(Error::Timeout)
    }

    fn with_driver<R>(
        &self,
        f: impl FnOnce(&mut Em4095<SHD, MOD, DEMOD, C>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        critical_section::with(|cs| {
            let mut slot = self.shared.borrow_ref_mut(cs);
            slot.driver
                .as_mut()
                .map_or(Err(Error::NotInitialized), f)
        })
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::mock::{MockClock, MockInput, MockOutput, Rig};
    use embedded_hal::digital::PinState;

    type MockShared = Shared<MockOutput, MockOutput, MockInput, MockClock>;

    /// Delay that fires `irqs_per_poll` clock interrupts while "sleeping"
    struct IsrDelay<'a> {
        shared: &'a MockShared,
        demod: MockInput,
        irqs_per_poll: usize,
        polls: usize,
    }

    impl IsrDelay<'_> {
        fn fire(&mut self) {
            self.polls += 1;
            for _ in 0..self.irqs_per_poll {
                self.demod.toggle();
                let _ = irq_handler(self.shared);
            }
        }
    }

    impl DelayNs for IsrDelay<'_> {
        fn delay_ns(&mut self, _ns: u32) {
            self.fire();
        }

        fn delay_ms(&mut self, _ms: u32) {
            self.fire();
        }
    }

    fn setup<'a>(rig: &Rig, shared: &'a MockShared, irqs_per_poll: usize) -> IsrDelay<'a> {
        rig.clock.set_step(8);
        IsrDelay {
            shared,
            demod: rig.demod.clone(),
            irqs_per_poll,
            polls: 0,
        }
    }

    #[test]
    fn operations_need_init() {
        let rig = Rig::new();
        let shared = MockShared::new(RefCell::new(Slot::new()));
        let mut basic = Basic::new(&shared, setup(&rig, &shared, 0));
        let mut buf = [0u8; 4];
        assert_eq!(basic.read(&mut buf, 4), Err(Error::NotInitialized));
        assert_eq!(basic.write(&[1]), Err(Error::NotInitialized));
        assert_eq!(basic.set_div(2), Err(Error::NotInitialized));
        assert_eq!(irq_handler(&shared), Err(Error::NotInitialized));
        assert!(basic.deinit().unwrap().is_none());
    }

    #[test]
    fn init_sets_default_div_and_sleeps() {
        let rig = Rig::new();
        let shared = MockShared::new(RefCell::new(Slot::new()));
        let mut basic = Basic::new(&shared, setup(&rig, &shared, 0));
        basic.init(rig.pins(), rig.clock.clone(), None).unwrap();
        let div = critical_section::with(|cs| {
            shared
                .borrow_ref(cs)
                .driver
                .as_ref()
                .map(|d| d.div())
        });
        assert_eq!(div, Some(DEFAULT_DIV));
        assert_eq!(rig.shd.writes(), [PinState::High, PinState::High]);
    }

    #[test]
    fn init_failure_leaves_slot_empty() {
        let rig = Rig::new();
        let shared = MockShared::new(RefCell::new(Slot::new()));
        let mut basic = Basic::new(&shared, setup(&rig, &shared, 0));
        rig.clock.fail(true);
        assert_eq!(
            basic.init(rig.pins(), rig.clock.clone(), None),
            Err(Error::Clock)
        );
        assert_eq!(irq_handler(&shared), Err(Error::NotInitialized));
    }

    #[test]
    fn blocking_read() {
        let rig = Rig::new();
        let shared = MockShared::new(RefCell::new(Slot::new()));
        let mut basic = Basic::new(&shared, setup(&rig, &shared, 64));
        basic.init(rig.pins(), rig.clock.clone(), None).unwrap();

        let mut buf = [0xAAu8; 16];
        basic.read(&mut buf, 16).unwrap();
        // demod toggles on every interrupt and samples are 64 interrupts apart, so they all land
        // on the low phase
        assert!(buf.iter().all(|&b| b == 0));
        // powered on for the transfer, asleep afterwards
        let shd = rig.shd.writes();
        assert_eq!(shd[shd.len() - 2..], [PinState::Low, PinState::High]);
    }

    #[test]
    fn blocking_write() {
        let rig = Rig::new();
        let shared = MockShared::new(RefCell::new(Slot::new()));
        let mut basic = Basic::new(&shared, setup(&rig, &shared, 100));
        basic.init(rig.pins(), rig.clock.clone(), None).unwrap();
        basic.set_div(1).unwrap();

        basic.write(&[0, 1, 1, 0, 1]).unwrap();
        assert_eq!(
            rig.modulation.writes(),
            [PinState::Low, PinState::High, PinState::Low, PinState::High]
        );
    }

    #[test]
    fn callback_runs_on_completion() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        static SAMPLES: AtomicUsize = AtomicUsize::new(0);
        fn on_receive(mode: Mode, samples: &[Sample]) {
            assert_eq!(mode, Mode::Write);
            CALLS.fetch_add(1, Ordering::SeqCst);
            SAMPLES.store(samples.len(), Ordering::SeqCst);
        }

        let rig = Rig::new();
        let shared = MockShared::new(RefCell::new(Slot::new()));
        let mut basic = Basic::new(&shared, setup(&rig, &shared, 64 * 4));
        basic
            .init(rig.pins(), rig.clock.clone(), Some(on_receive))
            .unwrap();
        basic.write(&[1, 0, 1]).unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(SAMPLES.load(Ordering::SeqCst), 3);

        // deinit drops the callback
        basic.deinit().unwrap();
        basic
            .init(rig.pins(), rig.clock.clone(), None)
            .unwrap();
        basic.write(&[1]).unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transfer_times_out() {
        let rig = Rig::new();
        let shared = MockShared::new(RefCell::new(Slot::new()));
        let mut basic = Basic::new(&shared, setup(&rig, &shared, 0));
        basic.init(rig.pins(), rig.clock.clone(), None).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(basic.read(&mut buf, 8), Err(Error::Timeout));
        assert_eq!(basic.delay.polls, TIMEOUT_POLLS as usize);
        assert_eq!(rig.shd.writes().last(), Some(&PinState::High));
        let busy = critical_section::with(|cs| {
            shared.borrow_ref(cs).driver.as_ref().map(|d| d.is_busy())
        });
        assert_eq!(busy, Some(false));

        // a late interrupt doesn't pick the stale read back up
        for _ in 0..64 * 8 {
            rig.demod.toggle();
            assert_eq!(irq_handler(&shared), Ok(None));
        }
    }

    #[test]
    fn short_buffer_is_rejected_before_transfer() {
        let rig = Rig::new();
        let shared = MockShared::new(RefCell::new(Slot::new()));
        let mut basic = Basic::new(&shared, setup(&rig, &shared, 64 * 8));
        basic.init(rig.pins(), rig.clock.clone(), None).unwrap();
        let shd_before = rig.shd.writes().len();

        let mut buf = [0u8; 2];
        assert_eq!(
            basic.read(&mut buf, 4),
            Err(Error::BufferTooSmall { required: 4 })
        );
        // the field was never switched on
        assert_eq!(rig.shd.writes().len(), shd_before);
        assert!(rig.modulation.writes().is_empty());
        assert_eq!(basic.delay.polls, 0);
    }

    #[test]
    fn deinit_returns_parts() {
        let rig = Rig::new();
        let shared = MockShared::new(RefCell::new(Slot::new()));
        let mut basic = Basic::new(&shared, setup(&rig, &shared, 0));
        basic.init(rig.pins(), rig.clock.clone(), None).unwrap();
        let parts = basic.deinit().unwrap();
        assert!(parts.is_some());
        assert_eq!(irq_handler(&shared), Err(Error::NotInitialized));
    }
}
