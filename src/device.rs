use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Device families. Each one has its own register layout and `PollResult` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    Energy,
    Environmental,
    DigitalInputPair,
    DigitalInputOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phases {
    Single,
    Three,
}

impl Phases {
    pub const fn count(self) -> usize {
        match self {
            Phases::Single => 1,
            Phases::Three => 3,
        }
    }
}

/// Which voltages an energy sensor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoltageReference {
    LineToNeutral,
    LineToLine,
}

bitflags! {
    /// What a device can report or be asked to do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u16 {
        const CURRENT = 1 << 0;
        const VOLTAGE = 1 << 1;
        const POWER = 1 << 2;
        const POWER_FACTOR = 1 << 3;
        const FREQUENCY = 1 << 4;
        const ENERGY_IMPORT = 1 << 5;
        const ENERGY_EXPORT = 1 << 6;
        const TEMPERATURE = 1 << 7;
        const HUMIDITY = 1 << 8;
        const ALARM = 1 << 9;
        const DIGITAL_INPUT = 1 << 10;
        const SECOND_DIGITAL_INPUT = 1 << 11;
        const DIGITAL_OUTPUT = 1 << 12;
        const THREE_PHASE = 1 << 13;
    }
}

impl Serialize for Capabilities {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        names.serialize(serializer)
    }
}

/// Static description of one device model, keyed by its type code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceModelConfig {
    pub type_code: u16,
    /// Commercial reference, e.g. "A9MEM1540"
    pub model: String,
    /// Human readable name
    pub name: String,
    pub category: DeviceCategory,
    #[serde(default = "default_phases")]
    pub phases: Phases,
    #[serde(default = "default_voltage_reference")]
    pub voltage_reference: VoltageReference,
}

fn default_phases() -> Phases {
    Phases::Single
}

fn default_voltage_reference() -> VoltageReference {
    VoltageReference::LineToNeutral
}

impl DeviceModelConfig {
    pub fn new(type_code: u16, model: &str, name: &str, category: DeviceCategory) -> Self {
        Self {
            type_code,
            model: model.to_string(),
            name: name.to_string(),
            category,
            phases: Phases::Single,
            voltage_reference: VoltageReference::LineToNeutral,
        }
    }

    pub fn energy(
        type_code: u16,
        model: &str,
        name: &str,
        phases: Phases,
        voltage_reference: VoltageReference,
    ) -> Self {
        Self {
            phases,
            voltage_reference,
            ..Self::new(type_code, model, name, DeviceCategory::Energy)
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self.category {
            DeviceCategory::Energy => {
                let mut caps = Capabilities::CURRENT
                    | Capabilities::VOLTAGE
                    | Capabilities::POWER
                    | Capabilities::POWER_FACTOR
                    | Capabilities::FREQUENCY
                    | Capabilities::ENERGY_IMPORT
                    | Capabilities::ENERGY_EXPORT
                    | Capabilities::TEMPERATURE;
                if self.phases == Phases::Three {
                    caps |= Capabilities::THREE_PHASE;
                }
                caps
            }
            DeviceCategory::Environmental => {
                Capabilities::TEMPERATURE | Capabilities::HUMIDITY | Capabilities::ALARM
            }
            DeviceCategory::DigitalInputPair => {
                Capabilities::DIGITAL_INPUT | Capabilities::SECOND_DIGITAL_INPUT
            }
            DeviceCategory::DigitalInputOutput => {
                Capabilities::DIGITAL_INPUT | Capabilities::DIGITAL_OUTPUT
            }
        }
    }
}

/// Read-only lookup from device type code to model description.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<u16, DeviceModelConfig>,
}

impl ModelRegistry {
    pub fn new(models: impl IntoIterator<Item = DeviceModelConfig>) -> Self {
        Self {
            models: models.into_iter().map(|m| (m.type_code, m)).collect(),
        }
    }

    /// Models known out of the box.
    pub fn builtin() -> Self {
        use DeviceCategory::*;
        use Phases::*;
        use VoltageReference::*;

        Self::new([
            DeviceModelConfig::energy(
                41,
                "A9MEM1520",
                "PowerTag M63 1P+N Top",
                Single,
                LineToNeutral,
            ),
            DeviceModelConfig::energy(
                42,
                "A9MEM1521",
                "PowerTag M63 1P+N Bottom",
                Single,
                LineToNeutral,
            ),
            DeviceModelConfig::energy(44, "A9MEM1540", "PowerTag M63 3P", Three, LineToLine),
            DeviceModelConfig::energy(
                45,
                "A9MEM1541",
                "PowerTag M63 3P+N Top",
                Three,
                LineToNeutral,
            ),
            DeviceModelConfig::energy(
                46,
                "A9MEM1542",
                "PowerTag M63 3P+N Bottom",
                Three,
                LineToNeutral,
            ),
            DeviceModelConfig::energy(92, "LV434020", "PowerTag M250 3P", Three, LineToLine),
            DeviceModelConfig::energy(96, "LV434023", "PowerTag M630 3P+N", Three, LineToNeutral),
            DeviceModelConfig::new(170, "EMS59440", "Easergy TH110", Environmental),
            DeviceModelConfig::new(171, "EMS59443", "Easergy CL110", Environmental),
            DeviceModelConfig::new(209, "A9XMC2D3", "Acti9 Control 2DI", DigitalInputPair),
            DeviceModelConfig::new(210, "A9XMC1D3", "Acti9 Control 1DI/1DO", DigitalInputOutput),
        ])
    }

    pub fn get(&self, type_code: u16) -> Option<&DeviceModelConfig> {
        self.models.get(&type_code)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceModelConfig> {
        self.models.values()
    }
}

/// Output control command. The register encodes three states; callers only
/// ever issue `Off` and `On`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCommand {
    NoOp,
    Off,
    On,
}

impl OutputCommand {
    pub const fn from_state(on: bool) -> Self {
        if on { OutputCommand::On } else { OutputCommand::Off }
    }

    pub const fn register_value(self) -> u16 {
        match self {
            OutputCommand::NoOp => 0,
            OutputCommand::Off => 1,
            OutputCommand::On => 2,
        }
    }
}
