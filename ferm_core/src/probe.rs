//! DS18B20-style temperature probes on a shared one-wire bus.
//!
//! `ProbeBus` owns the bus handle and the timing state every probe shares
//! (sample period, pending-conversion flag, conversion lead time). Each
//! `Probe` holds only its address and histories and borrows the bus per call.
//!
//! Scheduling: `start_conv()` issues one bus-wide conversion `offset` ms
//! before the next sample tick; `is_ready()` fires on the tick, polls the
//! completion bit and nudges the offset by 1 ms towards the shortest lead
//! time that still lets the devices finish.

use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::WrapErr;
use ferm_traits::onewire::{CMD_CONVERT_T, CMD_READ_SCRATCHPAD, Rom, SCRATCHPAD_LEN, crc8};
use ferm_traits::{BoxError, Clock, OneWire};

use crate::config::SensorCfg;
use crate::error::Result;
use crate::filter::Butterworth;
use crate::hw_error::map_hw_error;
use crate::util::period_ms;

/// Upper bound on devices returned by one enumeration.
const MAX_DEVICES: usize = 16;

fn hw<T>(r: std::result::Result<T, BoxError>, what: &'static str) -> Result<T> {
    r.map_err(|e| eyre::Report::new(map_hw_error(&*e)))
        .wrap_err(what)
}

/// Shared bus plus sample timing.
pub struct ProbeBus<W: OneWire> {
    wire: W,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    period_ms: u64,
    offset_ms: u64,
    max_polls: u32,
    sampled: bool,
    last_sample_ms: u64,
    last_polls: Option<u32>,
}

impl<W: OneWire> core::fmt::Debug for ProbeBus<W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProbeBus")
            .field("period_ms", &self.period_ms)
            .field("offset_ms", &self.offset_ms)
            .field("sampled", &self.sampled)
            .field("last_sample_ms", &self.last_sample_ms)
            .finish()
    }
}

impl<W: OneWire> ProbeBus<W> {
    pub fn new(wire: W, clock: Arc<dyn Clock + Send + Sync>, cfg: &SensorCfg) -> Self {
        let period_ms = period_ms(cfg.sample_hz);
        let epoch = clock.now();
        Self {
            wire,
            clock,
            epoch,
            period_ms,
            offset_ms: cfg.initial_offset_ms.clamp(1, period_ms),
            max_polls: cfg.max_polls.max(1),
            sampled: true,
            last_sample_ms: 0,
            last_polls: None,
        }
    }

    /// Milliseconds since the bus was created.
    pub fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    /// Enumerate devices; ROM codes failing their CRC are skipped.
    pub fn discover(&mut self) -> Result<Vec<Rom>> {
        self.wire.reset_search();
        let mut found = Vec::new();
        for _ in 0..MAX_DEVICES {
            let Some(rom) = hw(self.wire.search(), "searching one-wire bus")? else {
                break;
            };
            if crc8(&rom[..7]) != rom[7] {
                tracing::warn!(rom = %format_rom(&rom), "rejecting device with bad ROM crc");
                continue;
            }
            tracing::debug!(rom = %format_rom(&rom), "probe found");
            found.push(rom);
        }
        Ok(found)
    }

    /// Request a bus-wide conversion once the previous result has been
    /// consumed and the tick is within `offset` ms. Returns true when issued.
    pub fn start_conv(&mut self) -> Result<bool> {
        let due = (self.last_sample_ms + self.period_ms).saturating_sub(self.offset_ms);
        if !self.sampled || self.now_ms() < due {
            return Ok(false);
        }
        self.convert_all()?;
        self.sampled = false;
        tracing::trace!(offset_ms = self.offset_ms, "conversion requested");
        Ok(true)
    }

    /// True once per sample period, on the tick. Polls for completion
    /// (bounded by `max_polls`) and adapts the conversion offset.
    pub fn is_ready(&mut self) -> Result<bool> {
        let now = self.now_ms();
        if now < self.last_sample_ms + self.period_ms {
            return Ok(false);
        }
        self.last_sample_ms = now;
        self.sampled = true;
        let polls = self.poll_complete()?;
        match polls {
            Some(0) => self.offset_ms = self.offset_ms.saturating_sub(1).max(1),
            Some(_) => self.offset_ms = (self.offset_ms + 1).min(self.period_ms),
            None => {
                self.offset_ms = (self.offset_ms + 1).min(self.period_ms);
                tracing::warn!(max_polls = self.max_polls, "conversion still busy after bounded poll");
            }
        }
        self.last_polls = polls;
        tracing::trace!(?polls, offset_ms = self.offset_ms, "sample tick");
        Ok(true)
    }

    /// Convert now and wait for completion. Used once at start-up.
    pub fn convert_blocking(&mut self) -> Result<bool> {
        self.convert_all()?;
        Ok(self.poll_complete()?.is_some())
    }

    /// Current conversion lead time.
    pub fn conversion_offset_ms(&self) -> u64 {
        self.offset_ms
    }

    /// Completion polls needed on the last tick; `None` if the poll gave up.
    pub fn last_poll_count(&self) -> Option<u32> {
        self.last_polls
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn wire_mut(&mut self) -> &mut W {
        &mut self.wire
    }

    fn convert_all(&mut self) -> Result<()> {
        hw(self.wire.reset(), "resetting one-wire bus")?;
        hw(self.wire.skip(), "addressing all probes")?;
        hw(self.wire.write_byte(CMD_CONVERT_T), "starting conversion")
    }

    fn poll_complete(&mut self) -> Result<Option<u32>> {
        let mut polls = 0u32;
        loop {
            if hw(self.wire.read_bit(), "polling conversion")? {
                return Ok(Some(polls));
            }
            polls += 1;
            if polls >= self.max_polls {
                return Ok(None);
            }
            self.clock.sleep(Duration::from_millis(1));
        }
    }

    fn read_scratchpad(&mut self, rom: &Rom) -> Result<[u8; SCRATCHPAD_LEN]> {
        hw(self.wire.reset(), "resetting one-wire bus")?;
        hw(self.wire.select(rom), "selecting probe")?;
        hw(self.wire.write_byte(CMD_READ_SCRATCHPAD), "reading scratchpad")?;
        let mut pad = [0u8; SCRATCHPAD_LEN];
        for b in &mut pad {
            *b = hw(self.wire.read_byte(), "reading scratchpad")?;
        }
        Ok(pad)
    }
}

/// Decode a CRC-valid scratchpad into degrees Celsius.
///
/// Bits below the configured resolution (scratchpad byte 4, bits 5..6) are
/// undefined on the device and masked off.
pub fn decode_scratchpad(pad: &[u8; SCRATCHPAD_LEN]) -> f64 {
    let raw = i16::from_le_bytes([pad[0], pad[1]]);
    let shift = match pad[4] & 0x60 {
        0x00 => 3, // 9 bit
        0x20 => 2, // 10 bit
        0x40 => 1, // 11 bit
        _ => 0,    // 12 bit
    };
    f64::from((raw >> shift) << shift) / 16.0
}

/// Colon-separated hex form of a ROM code.
pub fn format_rom(rom: &Rom) -> String {
    rom.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// One temperature probe.
#[derive(Debug, Clone)]
pub struct Probe {
    address: Rom,
    filter: Butterworth,
    initialized: bool,
    stale_cycles: u32,
    crc_failures: u64,
}

impl Probe {
    pub fn new(address: Rom) -> Self {
        Self {
            address,
            filter: Butterworth::default(),
            initialized: false,
            stale_cycles: 0,
            crc_failures: 0,
        }
    }

    /// Take a first reading and seed every history slot with it.
    /// Returns false if no valid reading could be taken; the first valid
    /// `update()` seeds instead.
    pub fn init<W: OneWire>(&mut self, bus: &mut ProbeBus<W>) -> Result<bool> {
        if !bus.convert_blocking()? {
            tracing::warn!(rom = %format_rom(&self.address), "initial conversion did not complete");
        }
        let pad = bus.read_scratchpad(&self.address)?;
        if crc8(&pad[..8]) != pad[8] {
            tracing::warn!(rom = %format_rom(&self.address), "initial read failed crc");
            return Ok(false);
        }
        let t = decode_scratchpad(&pad);
        self.filter.seed(t);
        self.initialized = true;
        tracing::debug!(rom = %format_rom(&self.address), temp_c = t, "probe seeded");
        Ok(true)
    }

    /// Read the scratchpad and run the filter. A CRC mismatch leaves every
    /// stored value untouched and returns `Ok(false)`.
    pub fn update<W: OneWire>(&mut self, bus: &mut ProbeBus<W>) -> Result<bool> {
        let pad = match bus.read_scratchpad(&self.address) {
            Ok(p) => p,
            Err(e) => {
                self.stale_cycles = self.stale_cycles.saturating_add(1);
                return Err(e);
            }
        };
        if crc8(&pad[..8]) != pad[8] {
            self.stale_cycles = self.stale_cycles.saturating_add(1);
            self.crc_failures += 1;
            tracing::warn!(
                rom = %format_rom(&self.address),
                stale = self.stale_cycles,
                "scratchpad crc mismatch; keeping last reading"
            );
            return Ok(false);
        }
        let t = decode_scratchpad(&pad);
        if self.initialized {
            self.filter.push(t);
        } else {
            self.filter.seed(t);
            self.initialized = true;
        }
        self.stale_cycles = 0;
        tracing::debug!(
            rom = %format_rom(&self.address),
            temp_c = t,
            filtered_c = self.filter.value(),
            "probe sample"
        );
        Ok(true)
    }

    pub fn address(&self) -> &Rom {
        &self.address
    }

    /// Latest raw reading (degC).
    pub fn temperature(&self) -> f64 {
        self.filter.raw()
    }

    /// Latest filtered value (degC).
    pub fn filtered(&self) -> f64 {
        self.filter.value()
    }

    /// Negative peak on the filtered trace, two samples late.
    pub fn peak_detect(&self) -> bool {
        self.filter.negative_peak()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Consecutive failed reads.
    pub fn stale_cycles(&self) -> u32 {
        self.stale_cycles
    }

    pub fn crc_failures(&self) -> u64 {
        self.crc_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad(raw: i16, cfg: u8) -> [u8; SCRATCHPAD_LEN] {
        let [l, m] = raw.to_le_bytes();
        let mut p = [l, m, 0x4B, 0x46, cfg, 0xFF, 0x0C, 0x10, 0];
        p[8] = crc8(&p[..8]);
        p
    }

    #[test]
    fn decodes_twelve_bit_readings() {
        assert_eq!(decode_scratchpad(&pad(0x0191, 0x7F)), 25.0625);
        assert_eq!(decode_scratchpad(&pad(-0x0A2, 0x7F)), -10.125);
        assert_eq!(decode_scratchpad(&pad(0x0550, 0x7F)), 85.0);
    }

    #[test]
    fn masks_undefined_bits_at_lower_resolution() {
        // 25.0625 degC with garbage in the low bits
        assert_eq!(decode_scratchpad(&pad(0x0197, 0x1F)), 25.0);
        assert_eq!(decode_scratchpad(&pad(0x0197, 0x3F)), 25.25);
        assert_eq!(decode_scratchpad(&pad(0x0197, 0x5F)), 25.375);
        assert_eq!(decode_scratchpad(&pad(-0x0A3, 0x1F)), -10.5);
    }

    #[test]
    fn rom_formatting() {
        let rom = [0x28, 0xFF, 0, 1, 2, 3, 4, 0xA2];
        assert_eq!(format_rom(&rom), "28:FF:00:01:02:03:04:A2");
    }
}
