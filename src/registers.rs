use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};

/// Device-type values that mean "no device at this unit id".
pub const DEVICE_TYPE_ABSENT: [u16; 2] = [0x0000, 0xFFFF];

/// Fixed register blocks. Adjacent registers are grouped so that each
/// block is fetched in a single read transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Block {
    // Identification (all categories)
    DeviceType,
    DeviceName,
    CommercialReference,
    // Energy sensors
    Currents,
    VoltageLineToLine,
    VoltageLineToNeutral,
    ActivePower,
    PowerFactor,
    Frequency,
    DeviceTemperature,
    EnergyCounters,
    // Environmental sensors
    Environment,
    // Digital I/O modules
    DigitalInputs,
    DigitalIoStatus,
    OutputCommand,
}

impl Block {
    pub const fn address(&self) -> u16 {
        match self {
            Block::DeviceType => 31024,
            Block::DeviceName => 31000,
            Block::CommercialReference => 31060,
            Block::Currents => 2999,
            Block::VoltageLineToLine => 3019,
            Block::VoltageLineToNeutral => 3027,
            Block::ActivePower => 3053,
            Block::PowerFactor => 3083,
            Block::Frequency => 3109,
            Block::DeviceTemperature => 3131,
            Block::EnergyCounters => 3203,
            Block::Environment => 3069,
            Block::DigitalInputs | Block::DigitalIoStatus => 3400,
            Block::OutputCommand => 3420,
        }
    }

    pub const fn quantity(&self) -> u16 {
        match self {
            Block::DeviceType | Block::OutputCommand => 1,
            Block::PowerFactor | Block::Frequency | Block::DeviceTemperature => 2,
            Block::DigitalInputs | Block::DigitalIoStatus => 2,
            Block::Environment => 5,
            Block::Currents | Block::VoltageLineToLine | Block::VoltageLineToNeutral => 6,
            Block::ActivePower | Block::EnergyCounters => 8,
            Block::DeviceName => 10,
            Block::CommercialReference => 16,
        }
    }

    pub const fn is_writable(&self) -> bool {
        matches!(self, Block::OutputCommand)
    }

    /// Reject replies that do not cover the whole block.
    pub fn check(&self, regs: &[u16]) -> Result<()> {
        if regs.len() < self.quantity() as usize {
            return Err(Error::protocol(format!(
                "{:?}: expected {} registers at {}, got {}",
                self,
                self.quantity(),
                self.address(),
                regs.len()
            )));
        }
        Ok(())
    }
}

pub fn to_bytes(regs: &[u16]) -> Vec<u8> {
    let mut bytes = vec![0u8; regs.len() * 2];
    BigEndian::write_u16_into(regs, &mut bytes);
    bytes
}

/// Decode `count` consecutive big-endian f32 values (two registers each).
pub fn decode_f32s(regs: &[u16], count: usize) -> Result<Vec<f32>> {
    if regs.len() < count * 2 {
        return Err(Error::protocol(format!(
            "expected {} float registers, got {}",
            count * 2,
            regs.len()
        )));
    }
    let bytes = to_bytes(&regs[..count * 2]);
    Ok(bytes.chunks_exact(4).map(BigEndian::read_f32).collect())
}

pub fn decode_f32(regs: &[u16]) -> Result<f32> {
    Ok(decode_f32s(regs, 1)?[0])
}

/// Decode consecutive big-endian i64 values (four registers each).
pub fn decode_i64s(regs: &[u16], count: usize) -> Result<Vec<i64>> {
    if regs.len() < count * 4 {
        return Err(Error::protocol(format!(
            "expected {} integer registers, got {}",
            count * 4,
            regs.len()
        )));
    }
    let bytes = to_bytes(&regs[..count * 4]);
    Ok(bytes.chunks_exact(8).map(BigEndian::read_i64).collect())
}

/// Fixed-width string field: NUL-terminated ASCII, surrounding blanks trimmed.
pub fn decode_string(regs: &[u16]) -> String {
    let bytes = to_bytes(regs);
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

/// Device-type probe value, with both absence sentinels mapped to `None`.
pub fn decode_device_type(regs: &[u16]) -> Result<Option<u16>> {
    Block::DeviceType.check(regs)?;
    let code = regs[0];
    if DEVICE_TYPE_ABSENT.contains(&code) {
        Ok(None)
    } else {
        Ok(Some(code))
    }
}

/// Digital input status: the device reports 0 for an active input.
pub const fn input_is_on(raw: u16) -> bool {
    raw == 0
}

/// Digital output status: 1 = off, 2 = on; 0 (never commanded) reads as off.
pub const fn output_is_on(raw: u16) -> bool {
    raw == 2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_regs(values: &[f32]) -> Vec<u16> {
        values
            .iter()
            .flat_map(|v| {
                let bits = v.to_bits();
                [(bits >> 16) as u16, bits as u16]
            })
            .collect()
    }

    #[test]
    fn floats_are_high_word_first() {
        let regs = f32_regs(&[230.5, -1.25, 0.0]);
        assert_eq!(decode_f32s(&regs, 3).unwrap(), vec![230.5, -1.25, 0.0]);
        assert_eq!(regs[0], 0x4366);
    }

    #[test]
    fn short_float_block_is_protocol_error() {
        let regs = f32_regs(&[1.0, 2.0]);
        assert!(matches!(decode_f32s(&regs, 3), Err(Error::Protocol(_))));
    }

    #[test]
    fn i64_counters_are_big_endian() {
        let regs = [0x0000, 0x0000, 0x000F, 0x4240, 0xFFFF, 0xFFFF, 0xFFFF, 0xFFFF];
        assert_eq!(decode_i64s(&regs, 2).unwrap(), vec![1_000_000, -1]);
    }

    #[test]
    fn strings_stop_at_nul_and_trim() {
        let regs = [
            u16::from_be_bytes(*b" K"),
            u16::from_be_bytes(*b"it"),
            u16::from_be_bytes(*b"ch"),
            u16::from_be_bytes(*b"en"),
            u16::from_be_bytes([b' ', 0]),
            u16::from_be_bytes(*b"zz"),
        ];
        assert_eq!(decode_string(&regs), "Kitchen");
    }

    #[test]
    fn string_without_nul_uses_whole_block() {
        let regs = [u16::from_be_bytes(*b"AB"), u16::from_be_bytes(*b"CD")];
        assert_eq!(decode_string(&regs), "ABCD");
    }

    #[test]
    fn both_sentinels_mean_absent() {
        assert_eq!(decode_device_type(&[0]).unwrap(), None);
        assert_eq!(decode_device_type(&[0xFFFF]).unwrap(), None);
        assert_eq!(decode_device_type(&[44]).unwrap(), Some(44));
        assert!(matches!(decode_device_type(&[]), Err(Error::Protocol(_))));
    }

    #[test]
    fn input_zero_means_on() {
        assert!(input_is_on(0));
        assert!(!input_is_on(1));
    }

    #[test]
    fn output_status_differs_from_input() {
        assert!(output_is_on(2));
        assert!(!output_is_on(1));
        assert!(!output_is_on(0));
    }

    #[test]
    fn block_check_rejects_undersized_reply() {
        assert!(Block::Environment.check(&[0; 5]).is_ok());
        assert!(matches!(
            Block::Environment.check(&[0; 4]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn only_output_command_is_writable() {
        assert!(Block::OutputCommand.is_writable());
        assert!(!Block::DigitalIoStatus.is_writable());
    }
}
