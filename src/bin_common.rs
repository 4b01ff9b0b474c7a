use gateway_poller::{DiscoveredDevice, EnergyReading, PollResult};
use std::ops::RangeInclusive;
use uom::si::electric_current::ampere;
use uom::si::electric_potential::volt;
use uom::si::energy::kilowatt_hour;
use uom::si::frequency::hertz;
use uom::si::power::watt;
use uom::si::thermodynamic_temperature::degree_celsius;

pub fn print_device(device: &DiscoveredDevice) {
    println!("═══════════════════════════════════════════════════════════");
    println!("Unit {} ({}:{})", device.id.unit_id, device.id.host, device.id.port);
    println!("═══════════════════════════════════════════════════════════");
    println!("  Name: {}", device.name);
    println!(
        "  Model: {}  Type code: {}",
        device.store.model, device.store.type_code
    );
    let caps: Vec<_> = device.capabilities.iter_names().map(|(name, _)| name).collect();
    if !caps.is_empty() {
        println!("  Capabilities: {}", caps.join(", "));
    }
    println!();
}

#[allow(dead_code)]
pub fn print_reading(unit_id: u8, reading: &PollResult) {
    match reading {
        PollResult::Energy(energy) => print_energy(unit_id, energy),
        PollResult::Environmental(env) => println!(
            "Unit {:3}: {:.1} °C  {:.1} %RH  alarm: {}",
            unit_id,
            env.temperature.get::<degree_celsius>(),
            env.humidity_percent,
            env.alarm
        ),
        PollResult::DigitalInputPair(di) => println!(
            "Unit {:3}: IN1={} IN2={}",
            unit_id,
            on_off(di.input1),
            on_off(di.input2)
        ),
        PollResult::DigitalInputOutput(io) => println!(
            "Unit {:3}: IN={} OUT={}",
            unit_id,
            on_off(io.input),
            on_off(io.output)
        ),
    }
}

fn print_energy(unit_id: u8, energy: &EnergyReading) {
    println!(
        "Unit {:3}: {:.0} W  PF {:.2}  {:.2} Hz  {:.1} °C",
        unit_id,
        energy.total_power.get::<watt>(),
        energy.power_factor,
        energy.frequency.get::<hertz>(),
        energy.temperature.get::<degree_celsius>()
    );
    for (i, ((a, v), w)) in energy
        .currents
        .iter()
        .zip(&energy.voltages)
        .zip(&energy.phase_powers)
        .enumerate()
    {
        println!(
            "    L{}: {:6.1} V  {:6.2} A  {:8.0} W",
            i + 1,
            v.get::<volt>(),
            a.get::<ampere>(),
            w.get::<watt>()
        );
    }
    println!(
        "    Energy: {:.3} kWh in  {:.3} kWh out",
        energy.imported_energy.get::<kilowatt_hour>(),
        energy.exported_energy.get::<kilowatt_hour>()
    );
}

fn on_off(on: bool) -> &'static str {
    if on { "ON" } else { "OFF" }
}

pub fn parse_address(s: &str) -> Result<u8, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse()
            .map_err(|e: std::num::ParseIntError| e.to_string())
    }
}

/// Accepts `START-END` or a single address.
pub fn parse_range(s: &str) -> Result<RangeInclusive<u8>, String> {
    let (start, end) = match s.split_once('-') {
        Some((start, end)) => (parse_address(start)?, parse_address(end)?),
        None => {
            let addr = parse_address(s)?;
            (addr, addr)
        }
    };
    if start > end {
        return Err(format!("empty range {s}"));
    }
    Ok(start..=end)
}
