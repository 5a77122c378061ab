//! Host stand-ins for the GPIO lines and the timer
extern crate std;

use core::cell::{Cell, RefCell};
use std::{rc::Rc, vec::Vec};

use embedded_hal::digital::{self, ErrorKind, ErrorType, InputPin, OutputPin, PinState};

use crate::{Clock, Em4095, Pins, Timestamp};

pub type MockDriver = Em4095<MockOutput, MockOutput, MockInput, MockClock>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MockError;

impl digital::Error for MockError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Records every level written to it
#[derive(Clone, Default)]
pub struct MockOutput {
    writes: Rc<RefCell<Vec<PinState>>>,
    fail: Rc<Cell<bool>>,
}

impl MockOutput {
    pub fn writes(&self) -> Vec<PinState> {
        self.writes.borrow().clone()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.set(fail);
    }

    fn record(&self, state: PinState) -> Result<(), MockError> {
        if self.fail.get() {
            return Err(MockError);
        }
        self.writes.borrow_mut().push(state);
        Ok(())
    }
}

impl ErrorType for MockOutput {
    type Error = MockError;
}

impl OutputPin for MockOutput {
    fn set_low(&mut self) -> Result<(), MockError> {
        self.record(PinState::Low)
    }

    fn set_high(&mut self) -> Result<(), MockError> {
        self.record(PinState::High)
    }
}

/// Input whose level is set by the test
#[derive(Clone, Default)]
pub struct MockInput {
    level: Rc<Cell<bool>>,
    fail: Rc<Cell<bool>>,
}

impl MockInput {
    pub fn set(&self, high: bool) {
        self.level.set(high);
    }

    pub fn toggle(&self) {
        self.level.set(!self.level.get());
    }

    pub fn fail(&self, fail: bool) {
        self.fail.set(fail);
    }
}

impl ErrorType for MockInput {
    type Error = MockError;
}

impl InputPin for MockInput {
    fn is_high(&mut self) -> Result<bool, MockError> {
        if self.fail.get() {
            return Err(MockError);
        }
        Ok(self.level.get())
    }

    fn is_low(&mut self) -> Result<bool, MockError> {
        self.is_high().map(|high| !high)
    }
}

/// Microsecond counter, advances by `step` after every read
#[derive(Clone, Default)]
pub struct MockClock {
    ticks: Rc<Cell<u64>>,
    step: Rc<Cell<u64>>,
    fail: Rc<Cell<bool>>,
}

impl MockClock {
    pub fn set_step(&self, step: u64) {
        self.step.set(step);
    }

    pub fn advance(&self, micros: u64) {
        self.ticks.set(self.ticks.get() + micros);
    }

    pub fn peek(&self) -> u64 {
        self.ticks.get()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.set(fail);
    }
}

impl Clock for MockClock {
    type Error = MockError;

    fn now(&mut self) -> Result<Timestamp, MockError> {
        if self.fail.get() {
            return Err(MockError);
        }
        let now = self.ticks.get();
        self.advance(self.step.get());
        Ok(Timestamp::from_ticks(now))
    }
}

/// One set of mocks, cloned into the driver while the test keeps handles to inspect them
#[derive(Clone, Default)]
pub struct Rig {
    pub shd: MockOutput,
    pub modulation: MockOutput,
    pub demod: MockInput,
    pub clock: MockClock,
}

impl Rig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pins(&self) -> Pins<MockOutput, MockOutput, MockInput> {
        Pins {
            shd: self.shd.clone(),
            modulation: self.modulation.clone(),
            demod: self.demod.clone(),
        }
    }
}
