use core::fmt;

const CHIP_NAME: &str = "EM Microelectronic EM4095";
const MANUFACTURER_NAME: &str = "EM Microelectronic";
const INTERFACE: &str = "GPIO";
const SUPPLY_VOLTAGE_MIN: f32 = 4.1;
const SUPPLY_VOLTAGE_MAX: f32 = 5.5;
const MAX_CURRENT: f32 = 300.0;
const TEMPERATURE_MIN: f32 = -40.0;
const TEMPERATURE_MAX: f32 = 110.0;
const DRIVER_VERSION: u32 = 1000;

/// Chip and driver information
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Info {
    pub chip_name: &'static str,
    pub manufacturer_name: &'static str,
    pub interface: &'static str,
    /// Volts
    pub supply_voltage_min_v: f32,
    /// Volts
    pub supply_voltage_max_v: f32,
    /// Milliamps
    pub max_current_ma: f32,
    /// Degrees Celsius
    pub temperature_min: f32,
    /// Degrees Celsius
    pub temperature_max: f32,
    /// `major * 1000 + minor * 100`
    pub driver_version: u32,
}

impl Info {
    /// Driver version as `(major, minor)`
    pub fn version(&self) -> (u32, u32) {
        (
            self.driver_version / 1000,
            (self.driver_version % 1000) / 100,
        )
    }
}

pub fn info() -> Info {
    Info {
        chip_name: CHIP_NAME,
        manufacturer_name: MANUFACTURER_NAME,
        interface: INTERFACE,
        supply_voltage_min_v: SUPPLY_VOLTAGE_MIN,
        supply_voltage_max_v: SUPPLY_VOLTAGE_MAX,
        max_current_ma: MAX_CURRENT,
        temperature_min: TEMPERATURE_MIN,
        temperature_max: TEMPERATURE_MAX,
        driver_version: DRIVER_VERSION,
    }
}

impl fmt::Display for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor) = self.version();
        writeln!(f, "chip is {}.", self.chip_name)?;
        writeln!(f, "manufacturer is {}.", self.manufacturer_name)?;
        writeln!(f, "interface is {}.", self.interface)?;
        writeln!(f, "driver version is {major}.{minor}.")?;
        writeln!(f, "min supply voltage is {:.1}V.", self.supply_voltage_min_v)?;
        writeln!(f, "max supply voltage is {:.1}V.", self.supply_voltage_max_v)?;
        writeln!(f, "max current is {:.2}mA.", self.max_current_ma)?;
        writeln!(f, "max temperature is {:.1}C.", self.temperature_max)?;
        write!(f, "min temperature is {:.1}C.", self.temperature_min)
    }
}
