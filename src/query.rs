use crate::device::{DeviceCategory, DeviceModelConfig, OutputCommand};
use crate::error::{Error, Result};
use crate::readings::{
    DigitalInputOutput, DigitalInputPair, EnergyBlocks, EnergyReading, EnvironmentReading,
    PollResult, voltage_block,
};
use crate::registers::{self, Block};
use crate::transport::Transport;
use serde::Serialize;

/// What a device says about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identification {
    pub type_code: u16,
    pub name: String,
    pub commercial_reference: String,
}

pub async fn read_block<T: Transport>(
    transport: &mut T,
    unit_id: u8,
    block: Block,
) -> Result<Vec<u16>> {
    let regs = transport
        .read_holding_registers(unit_id, block.address(), block.quantity())
        .await?;
    block.check(&regs)?;
    Ok(regs)
}

async fn write_block<T: Transport>(
    transport: &mut T,
    unit_id: u8,
    block: Block,
    value: u16,
) -> Result<()> {
    if !block.is_writable() {
        return Err(Error::protocol(format!("{:?} is read-only", block)));
    }
    transport
        .write_single_register(unit_id, block.address(), value)
        .await
}

/// Read the device-type register. `Ok(None)` means nothing answers at this id.
pub async fn probe_device_type<T: Transport>(
    transport: &mut T,
    unit_id: u8,
) -> Result<Option<u16>> {
    let regs = read_block(transport, unit_id, Block::DeviceType).await?;
    registers::decode_device_type(&regs)
}

/// User-configurable name.
pub async fn read_name<T: Transport>(transport: &mut T, unit_id: u8) -> Result<String> {
    let regs = read_block(transport, unit_id, Block::DeviceName).await?;
    Ok(registers::decode_string(&regs))
}

pub async fn read_commercial_reference<T: Transport>(
    transport: &mut T,
    unit_id: u8,
) -> Result<String> {
    let regs = read_block(transport, unit_id, Block::CommercialReference).await?;
    Ok(registers::decode_string(&regs))
}

pub async fn identify<T: Transport>(transport: &mut T, unit_id: u8) -> Result<Identification> {
    let type_code = probe_device_type(transport, unit_id)
        .await?
        .ok_or_else(|| Error::protocol(format!("no device at unit {unit_id}")))?;

    Ok(Identification {
        type_code,
        name: read_name(transport, unit_id).await?,
        commercial_reference: read_commercial_reference(transport, unit_id).await?,
    })
}

pub async fn read_energy<T: Transport>(
    transport: &mut T,
    unit_id: u8,
    model: &DeviceModelConfig,
) -> Result<EnergyReading> {
    let blocks = EnergyBlocks {
        currents: read_block(transport, unit_id, Block::Currents).await?,
        voltages: read_block(transport, unit_id, voltage_block(model.voltage_reference)).await?,
        power: read_block(transport, unit_id, Block::ActivePower).await?,
        power_factor: read_block(transport, unit_id, Block::PowerFactor).await?,
        frequency: read_block(transport, unit_id, Block::Frequency).await?,
        temperature: read_block(transport, unit_id, Block::DeviceTemperature).await?,
        counters: read_block(transport, unit_id, Block::EnergyCounters).await?,
    };
    EnergyReading::decode(model.phases, model.voltage_reference, &blocks)
}

pub async fn read_environment<T: Transport>(
    transport: &mut T,
    unit_id: u8,
) -> Result<EnvironmentReading> {
    let regs = read_block(transport, unit_id, Block::Environment).await?;
    EnvironmentReading::from_registers(&regs)
}

pub async fn read_digital_inputs<T: Transport>(
    transport: &mut T,
    unit_id: u8,
) -> Result<DigitalInputPair> {
    let regs = read_block(transport, unit_id, Block::DigitalInputs).await?;
    DigitalInputPair::from_registers(&regs)
}

pub async fn read_digital_io<T: Transport>(
    transport: &mut T,
    unit_id: u8,
) -> Result<DigitalInputOutput> {
    let regs = read_block(transport, unit_id, Block::DigitalIoStatus).await?;
    DigitalInputOutput::from_registers(&regs)
}

/// Read whatever the model's category measures.
pub async fn poll<T: Transport>(
    transport: &mut T,
    unit_id: u8,
    model: &DeviceModelConfig,
) -> Result<PollResult> {
    Ok(match model.category {
        DeviceCategory::Energy => PollResult::Energy(read_energy(transport, unit_id, model).await?),
        DeviceCategory::Environmental => {
            PollResult::Environmental(read_environment(transport, unit_id).await?)
        }
        DeviceCategory::DigitalInputPair => {
            PollResult::DigitalInputPair(read_digital_inputs(transport, unit_id).await?)
        }
        DeviceCategory::DigitalInputOutput => {
            PollResult::DigitalInputOutput(read_digital_io(transport, unit_id).await?)
        }
    })
}

pub async fn write_output<T: Transport>(
    transport: &mut T,
    unit_id: u8,
    command: OutputCommand,
) -> Result<()> {
    write_block(transport, unit_id, Block::OutputCommand, command.register_value()).await
}
