//! Versioned controller record over byte-addressed storage.
//!
//! Layout (little endian):
//!
//! | offset | size | field                                        |
//! |--------|------|----------------------------------------------|
//! | 0      | 2    | version (`RECORD_VERSION`)                   |
//! | 2      | 1    | flags (see `FLAG_*`)                         |
//! | 3      | 16   | main kp, ki, kd, output (`f32` each)         |
//! | 19     | 16   | heat kp, ki, kd, output                      |
//! | 35     | 4    | setpoint (degC)                              |
//! | 39     | 4    | peak estimator (degC per hour)               |
//!
//! Saves are write-if-different: only bytes that changed are written.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::units::TempUnit;

pub const RECORD_VERSION: u16 = 11;
pub const RECORD_LEN: usize = 43;

pub const FLAG_MAIN_AUTO: u8 = 1 << 0;
pub const FLAG_HEAT_AUTO: u8 = 1 << 1;
pub const FLAG_FAHRENHEIT: u8 = 1 << 2;
pub const FLAG_PROFILE: u8 = 1 << 3;
pub const FLAG_LOGGING: u8 = 1 << 4;

/// Byte-addressed non-volatile storage.
pub trait ByteStore {
    fn capacity(&self) -> usize;
    fn read(&self, addr: usize) -> Result<u8, StoreError>;
    fn write(&mut self, addr: usize, value: u8) -> Result<(), StoreError>;
    /// Make written bytes durable.
    fn commit(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn out_of_bounds(addr: usize, cap: usize) -> StoreError {
    StoreError::Io(format!("address {addr} beyond capacity {cap}"))
}

/// RAM-backed store; erased cells read 0xFF.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    bytes: Vec<u8>,
    writes: u64,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0xFF; capacity],
            writes: 0,
        }
    }

    /// Total single-byte writes so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl ByteStore for MemoryStore {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, addr: usize) -> Result<u8, StoreError> {
        self.bytes
            .get(addr)
            .copied()
            .ok_or_else(|| out_of_bounds(addr, self.bytes.len()))
    }

    fn write(&mut self, addr: usize, value: u8) -> Result<(), StoreError> {
        let cap = self.bytes.len();
        let cell = self.bytes.get_mut(addr).ok_or_else(|| out_of_bounds(addr, cap))?;
        *cell = value;
        self.writes += 1;
        Ok(())
    }
}

/// File-backed store. The image is held in memory and replaced atomically on commit.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    bytes: Vec<u8>,
    dirty: bool,
}

impl FileStore {
    /// Open `path`, or start from an erased image if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> Result<Self, StoreError> {
        let path = path.into();
        let mut bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(StoreError::Io(format!("read {}: {e}", path.display()))),
        };
        bytes.resize(capacity, 0xFF);
        Ok(Self {
            path,
            bytes,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteStore for FileStore {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, addr: usize) -> Result<u8, StoreError> {
        self.bytes
            .get(addr)
            .copied()
            .ok_or_else(|| out_of_bounds(addr, self.bytes.len()))
    }

    fn write(&mut self, addr: usize, value: u8) -> Result<(), StoreError> {
        let cap = self.bytes.len();
        let cell = self.bytes.get_mut(addr).ok_or_else(|| out_of_bounds(addr, cap))?;
        *cell = value;
        self.dirty = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        write_atomic(&self.path, &self.bytes)
            .map_err(|e| StoreError::Io(format!("write {}: {e}", self.path.display())))?;
        self.dirty = false;
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

/// Display-form PID gains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tunings {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// Everything the controller persists between runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub main_auto: bool,
    pub heat_auto: bool,
    pub unit: TempUnit,
    pub profile_enabled: bool,
    pub logging_enabled: bool,
    pub main_tunings: Tunings,
    pub main_output: f64,
    pub heat_tunings: Tunings,
    pub heat_output: f64,
    pub setpoint_c: f64,
    pub peak_estimator: f64,
}

impl ControllerState {
    fn flags(&self) -> u8 {
        let mut f = 0;
        for (on, bit) in [
            (self.main_auto, FLAG_MAIN_AUTO),
            (self.heat_auto, FLAG_HEAT_AUTO),
            (self.unit == TempUnit::Fahrenheit, FLAG_FAHRENHEIT),
            (self.profile_enabled, FLAG_PROFILE),
            (self.logging_enabled, FLAG_LOGGING),
        ] {
            if on {
                f |= bit;
            }
        }
        f
    }

    /// Serialize into the fixed record layout.
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[0..2].copy_from_slice(&RECORD_VERSION.to_le_bytes());
        out[2] = self.flags();
        let fields = [
            self.main_tunings.kp,
            self.main_tunings.ki,
            self.main_tunings.kd,
            self.main_output,
            self.heat_tunings.kp,
            self.heat_tunings.ki,
            self.heat_tunings.kd,
            self.heat_output,
            self.setpoint_c,
            self.peak_estimator,
        ];
        for (i, v) in fields.iter().enumerate() {
            let at = 3 + i * 4;
            out[at..at + 4].copy_from_slice(&(*v as f32).to_le_bytes());
        }
        out
    }

    /// Parse and range-check a record.
    pub fn decode(bytes: &[u8; RECORD_LEN]) -> Result<Self, StoreError> {
        let version = u16::from_le_bytes([bytes[0], bytes[1]]);
        if version != RECORD_VERSION {
            return Err(StoreError::VersionMismatch {
                found: version,
                expected: RECORD_VERSION,
            });
        }
        let flags = bytes[2];
        let f = |i: usize| -> f64 {
            let at = 3 + i * 4;
            f64::from(f32::from_le_bytes([
                bytes[at],
                bytes[at + 1],
                bytes[at + 2],
                bytes[at + 3],
            ]))
        };
        let gain = |i: usize, name: &'static str| -> Result<f64, StoreError> {
            let v = f(i);
            if v.is_finite() && v >= 0.0 {
                Ok(v)
            } else {
                Err(StoreError::OutOfRange(name))
            }
        };
        let finite = |i: usize, name: &'static str| -> Result<f64, StoreError> {
            let v = f(i);
            if v.is_finite() {
                Ok(v)
            } else {
                Err(StoreError::OutOfRange(name))
            }
        };
        Ok(Self {
            main_auto: flags & FLAG_MAIN_AUTO != 0,
            heat_auto: flags & FLAG_HEAT_AUTO != 0,
            unit: if flags & FLAG_FAHRENHEIT != 0 {
                TempUnit::Fahrenheit
            } else {
                TempUnit::Celsius
            },
            profile_enabled: flags & FLAG_PROFILE != 0,
            logging_enabled: flags & FLAG_LOGGING != 0,
            main_tunings: Tunings {
                kp: gain(0, "main_kp")?,
                ki: gain(1, "main_ki")?,
                kd: gain(2, "main_kd")?,
            },
            main_output: finite(3, "main_output")?,
            heat_tunings: Tunings {
                kp: gain(4, "heat_kp")?,
                ki: gain(5, "heat_ki")?,
                kd: gain(6, "heat_kd")?,
            },
            heat_output: finite(7, "heat_output")?,
            setpoint_c: finite(8, "setpoint")?,
            peak_estimator: gain(9, "peak_estimator")?,
        })
    }
}

/// `load`/`save` of the controller record at `base` within a `ByteStore`.
#[derive(Debug)]
pub struct StateStore<B: ByteStore> {
    store: B,
    base: usize,
}

impl<B: ByteStore> StateStore<B> {
    pub fn new(store: B) -> Self {
        Self { store, base: 0 }
    }

    pub fn at(store: B, base: usize) -> Self {
        Self { store, base }
    }

    pub fn load(&self) -> Result<ControllerState, StoreError> {
        let mut buf = [0u8; RECORD_LEN];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.store.read(self.base + i)?;
        }
        ControllerState::decode(&buf)
    }

    /// Write the bytes that differ from storage. Returns whether anything changed.
    pub fn save(&mut self, state: &ControllerState) -> Result<bool, StoreError> {
        let encoded = state.encode();
        let mut changed = 0usize;
        for (i, b) in encoded.iter().enumerate() {
            let addr = self.base + i;
            if self.store.read(addr)? != *b {
                self.store.write(addr, *b)?;
                changed += 1;
            }
        }
        if changed > 0 {
            self.store.commit()?;
            tracing::debug!(bytes = changed, "controller state saved");
        }
        Ok(changed > 0)
    }

    pub fn inner(&self) -> &B {
        &self.store
    }

    pub fn into_inner(self) -> B {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ControllerState {
        ControllerState {
            main_auto: true,
            heat_auto: false,
            unit: TempUnit::Fahrenheit,
            profile_enabled: false,
            logging_enabled: true,
            main_tunings: Tunings {
                kp: 10.0,
                ki: 0.005,
                kd: 50.0,
            },
            main_output: 12.5,
            heat_tunings: Tunings {
                kp: 60000.0,
                ki: 60.0,
                kd: 0.0,
            },
            heat_output: 0.0,
            setpoint_c: 18.0,
            peak_estimator: 1.25,
        }
    }

    #[test]
    fn erased_store_reports_version_mismatch() {
        let store = StateStore::new(MemoryStore::new(64));
        assert_eq!(
            store.load(),
            Err(StoreError::VersionMismatch {
                found: 0xFFFF,
                expected: RECORD_VERSION
            })
        );
    }

    #[test]
    fn save_is_write_if_different() {
        let mut store = StateStore::new(MemoryStore::new(64));
        assert!(store.save(&sample()).expect("save"));
        let first = store.inner().writes();
        assert!(first > 0 && first <= RECORD_LEN as u64);
        assert!(!store.save(&sample()).expect("resave"));
        assert_eq!(store.inner().writes(), first);

        let mut s = sample();
        s.main_auto = false;
        assert!(store.save(&s).expect("flag change"));
        assert_eq!(store.inner().writes(), first + 1);
    }

    #[test]
    fn load_returns_saved_values() {
        let mut store = StateStore::at(MemoryStore::new(128), 16);
        store.save(&sample()).expect("save");
        let loaded = store.load().expect("load");
        assert_eq!(loaded.flags(), sample().flags());
        assert_eq!(loaded.main_output, 12.5);
        assert_eq!(loaded.peak_estimator, 1.25);
        assert!((loaded.main_tunings.ki - 0.005).abs() < 1e-9);
    }

    #[test]
    fn negative_gain_is_out_of_range() {
        let mut bytes = sample().encode();
        bytes[3..7].copy_from_slice(&(-1.0f32).to_le_bytes());
        assert_eq!(
            ControllerState::decode(&bytes),
            Err(StoreError::OutOfRange("main_kp"))
        );
    }

    #[test]
    fn short_store_is_an_io_error() {
        let mut store = StateStore::new(MemoryStore::new(8));
        assert!(matches!(store.save(&sample()), Err(StoreError::Io(_))));
    }
}
