//! In-memory gateway for exercising the pool and the scanner without a network.
#![allow(dead_code)]

use gateway_poller::{Connector, Error, Result, Transport};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

pub const DEVICE_TYPE: u16 = 31024;
pub const DEVICE_NAME: u16 = 31000;
pub const OUTPUT_COMMAND: u16 = 3420;
pub const IO_STATUS: u16 = 3400;

#[derive(Default)]
struct GatewayState {
    units: HashMap<u8, HashMap<u16, u16>>,
    silent: HashSet<u8>,
    refuse_connect: bool,
    hang_connect: bool,
    connect_attempts: usize,
    connects: usize,
    requests: Vec<(u8, u16)>,
}

/// Simulated gateway. Clones share state, so a test keeps one handle while
/// the pool owns another.
#[derive(Clone)]
pub struct MockGateway {
    state: Arc<Mutex<GatewayState>>,
    /// Bumped to break every open connection.
    generation: Arc<watch::Sender<usize>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            generation: Arc::new(watch::channel(0).0),
        }
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap()
    }

    pub fn add_device(&self, unit_id: u8, type_code: u16) -> &Self {
        self.set_registers(unit_id, DEVICE_TYPE, &[type_code])
    }

    pub fn set_registers(&self, unit_id: u8, address: u16, values: &[u16]) -> &Self {
        let mut state = self.lock();
        let regs = state.units.entry(unit_id).or_default();
        for (i, &value) in values.iter().enumerate() {
            regs.insert(address + i as u16, value);
        }
        self
    }

    pub fn set_name(&self, unit_id: u8, name: &str) -> &Self {
        let mut bytes = name.as_bytes().to_vec();
        bytes.resize(20, 0);
        let regs: Vec<u16> = bytes
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        self.set_registers(unit_id, DEVICE_NAME, &regs)
    }

    pub fn set_f32s(&self, unit_id: u8, address: u16, values: &[f32]) -> &Self {
        self.set_registers(unit_id, address, &f32_registers(values))
    }

    pub fn register(&self, unit_id: u8, address: u16) -> Option<u16> {
        self.lock().units.get(&unit_id)?.get(&address).copied()
    }

    /// Requests to these units never get an answer.
    pub fn silence(&self, units: impl IntoIterator<Item = u8>) {
        self.lock().silent.extend(units);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connect = refuse;
    }

    pub fn hang_connections(&self, hang: bool) {
        self.lock().hang_connect = hang;
    }

    /// Close every open connection. Idle transports see it through
    /// `closed()`; a request on one fails with a reset.
    pub fn drop_connections(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// Unit ids in the order requests reached the gateway.
    pub fn requests(&self) -> Vec<u8> {
        self.lock().requests.iter().map(|&(unit, _)| unit).collect()
    }

    /// Unit ids whose device type was probed, in order.
    pub fn probed(&self) -> Vec<u8> {
        self.lock()
            .requests
            .iter()
            .filter(|&&(_, address)| address == DEVICE_TYPE)
            .map(|&(unit, _)| unit)
            .collect()
    }
}

pub fn f32_registers(values: &[f32]) -> Vec<u16> {
    values
        .iter()
        .flat_map(|v| {
            let bits = v.to_bits();
            [(bits >> 16) as u16, bits as u16]
        })
        .collect()
}

pub fn i64_registers(values: &[i64]) -> Vec<u16> {
    values
        .iter()
        .flat_map(|v| {
            let b = v.to_be_bytes();
            [
                u16::from_be_bytes([b[0], b[1]]),
                u16::from_be_bytes([b[2], b[3]]),
                u16::from_be_bytes([b[4], b[5]]),
                u16::from_be_bytes([b[6], b[7]]),
            ]
        })
        .collect()
}

impl Connector for MockGateway {
    type Transport = MockTransport;

    async fn connect(&self, _host: &str, _port: u16) -> Result<MockTransport> {
        let (refuse, hang) = {
            let mut state = self.lock();
            state.connect_attempts += 1;
            (state.refuse_connect, state.hang_connect)
        };
        if hang {
            futures::future::pending::<()>().await;
        }
        if refuse {
            return Err(std::io::Error::from(ErrorKind::ConnectionRefused).into());
        }

        self.lock().connects += 1;
        let link = self.generation.subscribe();
        let generation = *link.borrow();
        Ok(MockTransport {
            gateway: self.clone(),
            generation,
            link,
        })
    }
}

pub struct MockTransport {
    gateway: MockGateway,
    generation: usize,
    link: watch::Receiver<usize>,
}

enum Reply<T> {
    Ready(Result<T>),
    Never,
}

impl MockTransport {
    fn request<T>(
        &self,
        unit_id: u8,
        address: u16,
        f: impl FnOnce(&mut GatewayState) -> Result<T>,
    ) -> Reply<T> {
        if *self.link.borrow() != self.generation {
            return Reply::Ready(Err(std::io::Error::from(ErrorKind::ConnectionReset).into()));
        }
        let mut state = self.gateway.lock();
        state.requests.push((unit_id, address));
        if state.silent.contains(&unit_id) {
            return Reply::Never;
        }
        Reply::Ready(f(&mut *state))
    }
}

impl Transport for MockTransport {
    async fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>> {
        let reply = self.request(unit_id, address, |state| match state.units.get(&unit_id) {
            Some(regs) => Ok((address..address + quantity)
                .map(|a| regs.get(&a).copied().unwrap_or(0))
                .collect()),
            // Gateways answer the type register of empty slots with 0xFFFF.
            None if address == DEVICE_TYPE => Ok(vec![0xFFFF; quantity as usize]),
            None => Err(Error::protocol("illegal data address")),
        });
        match reply {
            Reply::Ready(result) => result,
            Reply::Never => futures::future::pending().await,
        }
    }

    async fn write_single_register(&mut self, unit_id: u8, address: u16, value: u16) -> Result<()> {
        let reply = self.request(unit_id, address, |state| {
            let regs = state
                .units
                .get_mut(&unit_id)
                .ok_or_else(|| Error::protocol("illegal data address"))?;
            regs.insert(address, value);
            // The output module mirrors its last command in the status block.
            if address == OUTPUT_COMMAND && value != 0 {
                regs.insert(IO_STATUS + 1, value);
            }
            Ok(())
        });
        match reply {
            Reply::Ready(result) => result,
            Reply::Never => futures::future::pending().await,
        }
    }

    async fn closed(&mut self) -> Error {
        let generation = self.generation;
        // The sender lives as long as `self.gateway`, so this only returns
        // once the connection is dropped.
        let _ = self.link.wait_for(|&current| current != generation).await;
        std::io::Error::from(ErrorKind::ConnectionReset).into()
    }
}
