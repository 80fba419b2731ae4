pub mod error;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod gpio;
pub mod plant;

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ferm_traits::onewire::{
    CMD_CONVERT_T, CMD_READ_SCRATCHPAD, ROM_LEN, Rom, SCRATCHPAD_LEN, crc8,
};
use ferm_traits::{BoxError, Clock, OneWire, Relay};

use crate::error::HwError;

pub use plant::ThermalPlant;

/// DS18B20 family code.
pub const FAMILY_DS18B20: u8 = 0x28;

/// Conversion resolution of a simulated probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Bits9,
    Bits10,
    Bits11,
    Bits12,
}

impl Resolution {
    /// Configuration register value (scratchpad byte 4).
    pub fn config_byte(self) -> u8 {
        match self {
            Resolution::Bits9 => 0x1F,
            Resolution::Bits10 => 0x3F,
            Resolution::Bits11 => 0x5F,
            Resolution::Bits12 => 0x7F,
        }
    }

    /// Worst-case conversion time.
    pub fn conversion_time(self) -> Duration {
        match self {
            Resolution::Bits9 => Duration::from_micros(93_750),
            Resolution::Bits10 => Duration::from_micros(187_500),
            Resolution::Bits11 => Duration::from_millis(375),
            Resolution::Bits12 => Duration::from_millis(750),
        }
    }

    /// Number of undefined low bits in the temperature register.
    fn undefined_bits(self) -> u32 {
        match self {
            Resolution::Bits9 => 3,
            Resolution::Bits10 => 2,
            Resolution::Bits11 => 1,
            Resolution::Bits12 => 0,
        }
    }
}

/// Shared handle to a simulated probe; clones observe and steer the same device.
#[derive(Debug, Clone)]
pub struct SimProbe {
    temp_c: Rc<Cell<f64>>,
    corrupt_reads: Rc<Cell<u32>>,
    present: Rc<Cell<bool>>,
    resolution: Rc<Cell<Resolution>>,
}

impl SimProbe {
    fn new(temp_c: f64) -> Self {
        Self {
            temp_c: Rc::new(Cell::new(temp_c)),
            corrupt_reads: Rc::new(Cell::new(0)),
            present: Rc::new(Cell::new(true)),
            resolution: Rc::new(Cell::new(Resolution::Bits12)),
        }
    }

    pub fn temperature(&self) -> f64 {
        self.temp_c.get()
    }

    /// Set the physical temperature the next conversion will latch.
    pub fn set_temperature(&self, temp_c: f64) {
        self.temp_c.set(temp_c);
    }

    /// Flip a bit in the next `n` scratchpad reads so their CRC fails.
    pub fn corrupt_next_reads(&self, n: u32) {
        self.corrupt_reads.set(n);
    }

    /// A disconnected probe stops answering; its reads return an idle (all ones) bus.
    pub fn set_present(&self, present: bool) {
        self.present.set(present);
    }

    pub fn set_resolution(&self, resolution: Resolution) {
        self.resolution.set(resolution);
    }
}

struct SimDevice {
    rom: Rom,
    probe: SimProbe,
    // Temperature register as last latched by a finished conversion.
    register: i16,
    converting: Option<(Instant, f64)>,
}

impl SimDevice {
    fn settle(&mut self, now: Instant) {
        if let Some((done_at, temp_c)) = self.converting
            && now >= done_at
        {
            let res = self.probe.resolution.get();
            let raw = (temp_c * 16.0).round() as i16;
            let shift = res.undefined_bits();
            self.register = (raw >> shift) << shift;
            self.converting = None;
        }
    }

    fn scratchpad(&self) -> [u8; SCRATCHPAD_LEN] {
        let [lsb, msb] = self.register.to_le_bytes();
        let mut pad = [
            lsb,
            msb,
            0x4B,
            0x46,
            self.probe.resolution.get().config_byte(),
            0xFF,
            0x0C,
            0x10,
            0,
        ];
        pad[8] = crc8(&pad[..8]);
        pad
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    None,
    All,
    One(usize),
}

/// Simulated one-wire master with DS18B20-style probes attached.
///
/// Conversions take the probe's resolution-dependent time on the shared clock,
/// so a `ManualClock` drives the whole bus deterministically.
pub struct SimulatedBus {
    clock: Arc<dyn Clock + Send + Sync>,
    devices: Vec<SimDevice>,
    selection: Selection,
    read_queue: VecDeque<u8>,
    search_cursor: usize,
}

impl SimulatedBus {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            clock,
            devices: Vec::new(),
            selection: Selection::None,
            read_queue: VecDeque::new(),
            search_cursor: 0,
        }
    }

    /// Attach a probe with the given 48-bit serial number; returns its control handle.
    pub fn attach_probe(&mut self, serial: u64, temp_c: f64) -> SimProbe {
        let mut rom = [0u8; ROM_LEN];
        rom[0] = FAMILY_DS18B20;
        rom[1..7].copy_from_slice(&serial.to_le_bytes()[..6]);
        rom[7] = crc8(&rom[..7]);
        let probe = SimProbe::new(temp_c);
        self.devices.push(SimDevice {
            rom,
            probe: probe.clone(),
            // Power-on register value: 85 degC.
            register: 0x0550,
            converting: None,
        });
        probe
    }

    /// ROM code of the n-th attached probe.
    pub fn rom(&self, index: usize) -> Option<Rom> {
        self.devices.get(index).map(|d| d.rom)
    }

    fn settle_all(&mut self) {
        let now = self.clock.now();
        for d in &mut self.devices {
            d.settle(now);
        }
    }

    fn selected(&self) -> impl Iterator<Item = usize> + '_ {
        let n = self.devices.len();
        let range = match self.selection {
            Selection::None => 0..0,
            Selection::All => 0..n,
            Selection::One(i) => i..i + 1,
        };
        range.filter(move |i| self.devices[*i].probe.present.get())
    }
}

impl OneWire for SimulatedBus {
    fn reset(&mut self) -> Result<bool, BoxError> {
        self.selection = Selection::None;
        self.read_queue.clear();
        Ok(self.devices.iter().any(|d| d.probe.present.get()))
    }

    fn skip(&mut self) -> Result<(), BoxError> {
        self.selection = Selection::All;
        Ok(())
    }

    fn select(&mut self, rom: &Rom) -> Result<(), BoxError> {
        self.selection = match self.devices.iter().position(|d| &d.rom == rom) {
            Some(i) => Selection::One(i),
            None => Selection::None,
        };
        Ok(())
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), BoxError> {
        self.settle_all();
        match byte {
            CMD_CONVERT_T => {
                let now = self.clock.now();
                let targets: Vec<usize> = self.selected().collect();
                for i in targets {
                    let d = &mut self.devices[i];
                    let done_at = now + d.probe.resolution.get().conversion_time();
                    d.converting = Some((done_at, d.probe.temperature()));
                }
                Ok(())
            }
            CMD_READ_SCRATCHPAD => {
                let Selection::One(i) = self.selection else {
                    return Err(Box::new(HwError::Bus(
                        "read scratchpad requires a single selected device".into(),
                    )));
                };
                let d = &self.devices[i];
                if !d.probe.present.get() {
                    return Ok(());
                }
                let mut pad = d.scratchpad();
                let corrupt = d.probe.corrupt_reads.get();
                if corrupt > 0 {
                    d.probe.corrupt_reads.set(corrupt - 1);
                    pad[0] ^= 0x01;
                }
                self.read_queue.extend(pad);
                Ok(())
            }
            other => Err(Box::new(HwError::Bus(format!(
                "unsupported function command 0x{other:02X}"
            )))),
        }
    }

    fn read_byte(&mut self) -> Result<u8, BoxError> {
        // An idle bus reads as all ones.
        Ok(self.read_queue.pop_front().unwrap_or(0xFF))
    }

    fn read_bit(&mut self) -> Result<bool, BoxError> {
        self.settle_all();
        let busy = self
            .devices
            .iter()
            .any(|d| d.probe.present.get() && d.converting.is_some());
        Ok(!busy)
    }

    fn reset_search(&mut self) {
        self.search_cursor = 0;
    }

    fn search(&mut self) -> Result<Option<Rom>, BoxError> {
        while let Some(d) = self.devices.get(self.search_cursor) {
            self.search_cursor += 1;
            if d.probe.present.get() {
                return Ok(Some(d.rom));
            }
        }
        Ok(None)
    }
}

/// Observer for a simulated relay.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    on: Rc<Cell<bool>>,
    switches: Rc<Cell<u32>>,
}

impl RelayHandle {
    pub fn is_on(&self) -> bool {
        self.on.get()
    }

    /// Number of off/on edges seen so far.
    pub fn switch_count(&self) -> u32 {
        self.switches.get()
    }
}

/// Simulated relay implementation
#[derive(Debug)]
pub struct SimulatedRelay {
    name: &'static str,
    handle: RelayHandle,
}

impl SimulatedRelay {
    pub fn new(name: &'static str) -> Self {
        SimulatedRelay {
            name,
            handle: RelayHandle {
                on: Rc::new(Cell::new(false)),
                switches: Rc::new(Cell::new(0)),
            },
        }
    }

    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }
}

impl Relay for SimulatedRelay {
    fn set(&mut self, on: bool) -> Result<(), BoxError> {
        if self.handle.on.get() != on {
            self.handle.switches.set(self.handle.switches.get() + 1);
            tracing::debug!(relay = self.name, on, "relay switched (simulated)");
        }
        self.handle.on.set(on);
        Ok(())
    }
}
