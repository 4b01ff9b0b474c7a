use crate::device::{Phases, VoltageReference};
use crate::error::{Error, Result};
use crate::registers::{self, Block};
use uom::si::electric_current::ampere;
use uom::si::electric_potential::volt;
use uom::si::energy::kilowatt_hour;
use uom::si::f32::{ElectricCurrent, ElectricPotential, Frequency, Power, ThermodynamicTemperature};
use uom::si::f64::Energy;
use uom::si::frequency::hertz;
use uom::si::power::watt;
use uom::si::thermodynamic_temperature::degree_celsius;

/// One fresh set of measurements, shaped by the device category.
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    Energy(EnergyReading),
    Environmental(EnvironmentReading),
    DigitalInputPair(DigitalInputPair),
    DigitalInputOutput(DigitalInputOutput),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnergyReading {
    /// One entry per phase
    pub currents: Vec<ElectricCurrent>,
    /// One entry per phase, measured against `voltage_reference`
    pub voltages: Vec<ElectricPotential>,
    pub voltage_reference: VoltageReference,
    /// One entry per phase
    pub phase_powers: Vec<Power>,
    pub total_power: Power,
    pub power_factor: f32,
    pub frequency: Frequency,
    pub temperature: ThermodynamicTemperature,
    pub imported_energy: Energy,
    pub exported_energy: Energy,
}

/// Raw register blocks of an energy sensor, one per read transaction.
#[derive(Debug, Clone, Default)]
pub struct EnergyBlocks {
    pub currents: Vec<u16>,
    pub voltages: Vec<u16>,
    pub power: Vec<u16>,
    pub power_factor: Vec<u16>,
    pub frequency: Vec<u16>,
    pub temperature: Vec<u16>,
    pub counters: Vec<u16>,
}

impl EnergyReading {
    pub fn decode(
        phases: Phases,
        voltage_reference: VoltageReference,
        blocks: &EnergyBlocks,
    ) -> Result<Self> {
        let n = phases.count();
        let voltage_block = voltage_block(voltage_reference);

        Block::Currents.check(&blocks.currents)?;
        voltage_block.check(&blocks.voltages)?;
        Block::ActivePower.check(&blocks.power)?;
        Block::PowerFactor.check(&blocks.power_factor)?;
        Block::Frequency.check(&blocks.frequency)?;
        Block::DeviceTemperature.check(&blocks.temperature)?;

        let currents = registers::decode_f32s(&blocks.currents, 3)?;
        let voltages = registers::decode_f32s(&blocks.voltages, 3)?;
        let powers = registers::decode_f32s(&blocks.power, 4)?;
        let (imported_energy, exported_energy) = decode_energy_counters(&blocks.counters)?;

        Ok(Self {
            currents: currents
                .iter()
                .take(n)
                .map(|&a| ElectricCurrent::new::<ampere>(a))
                .collect(),
            voltages: voltages
                .iter()
                .take(n)
                .map(|&v| ElectricPotential::new::<volt>(v))
                .collect(),
            voltage_reference,
            phase_powers: powers
                .iter()
                .take(n)
                .map(|&w| Power::new::<watt>(w))
                .collect(),
            total_power: Power::new::<watt>(powers[3]),
            power_factor: registers::decode_f32(&blocks.power_factor)?,
            frequency: Frequency::new::<hertz>(registers::decode_f32(&blocks.frequency)?),
            temperature: ThermodynamicTemperature::new::<degree_celsius>(registers::decode_f32(
                &blocks.temperature,
            )?),
            imported_energy,
            exported_energy,
        })
    }
}

pub const fn voltage_block(reference: VoltageReference) -> Block {
    match reference {
        VoltageReference::LineToNeutral => Block::VoltageLineToNeutral,
        VoltageReference::LineToLine => Block::VoltageLineToLine,
    }
}

/// Imported/exported counters are reported in Wh; expose them in kWh.
pub fn decode_energy_counters(regs: &[u16]) -> Result<(Energy, Energy)> {
    Block::EnergyCounters.check(regs)?;
    let counters = registers::decode_i64s(regs, 2)?;
    let to_kwh = |wh: i64| Energy::new::<kilowatt_hour>(wh as f64 / 1000.0);
    Ok((to_kwh(counters[0]), to_kwh(counters[1])))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlarmLevel {
    None,
    Low,
    Medium,
    High,
}

impl AlarmLevel {
    pub const fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(AlarmLevel::None),
            1 => Some(AlarmLevel::Low),
            2 => Some(AlarmLevel::Medium),
            3 => Some(AlarmLevel::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlarmLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmLevel::None => write!(f, "none"),
            AlarmLevel::Low => write!(f, "low"),
            AlarmLevel::Medium => write!(f, "medium"),
            AlarmLevel::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentReading {
    pub temperature: ThermodynamicTemperature,
    pub humidity_percent: f32,
    pub alarm: AlarmLevel,
}

impl EnvironmentReading {
    pub fn from_registers(regs: &[u16]) -> Result<Self> {
        Block::Environment.check(regs)?;
        let values = registers::decode_f32s(regs, 2)?;
        let alarm = AlarmLevel::from_u16(regs[4])
            .ok_or_else(|| Error::protocol(format!("alarm level {} out of range", regs[4])))?;

        Ok(Self {
            temperature: ThermodynamicTemperature::new::<degree_celsius>(values[0]),
            humidity_percent: values[1] * 100.0,
            alarm,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitalInputPair {
    pub input1: bool,
    pub input2: bool,
}

impl DigitalInputPair {
    pub fn from_registers(regs: &[u16]) -> Result<Self> {
        Block::DigitalInputs.check(regs)?;
        Ok(Self {
            input1: registers::input_is_on(regs[0]),
            input2: registers::input_is_on(regs[1]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitalInputOutput {
    pub input: bool,
    pub output: bool,
}

impl DigitalInputOutput {
    pub fn from_registers(regs: &[u16]) -> Result<Self> {
        Block::DigitalIoStatus.check(regs)?;
        Ok(Self {
            input: registers::input_is_on(regs[0]),
            output: registers::output_is_on(regs[1]),
        })
    }
}
