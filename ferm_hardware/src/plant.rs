//! First-order thermal model of a fermentation chamber.
//!
//! Two lumped masses (chamber air and beer) exchange heat with each other and
//! the air leaks towards ambient. The compressor pulls heat out of the air and
//! the heater pushes it in. Good enough to exercise the control loop on a desktop.

use crate::{RelayHandle, SimProbe};

/// Heat-transfer rates, all per second.
#[derive(Debug, Clone, Copy)]
pub struct PlantParams {
    /// Air towards ambient.
    pub air_ambient_k: f64,
    /// Air towards beer.
    pub air_beer_k: f64,
    /// Beer towards air.
    pub beer_air_k: f64,
    /// Air temperature drop while the compressor runs (degC/s).
    pub cool_rate: f64,
    /// Air temperature rise while the heater is on (degC/s).
    pub heat_rate: f64,
}

impl Default for PlantParams {
    fn default() -> Self {
        Self {
            air_ambient_k: 1.0 / 3600.0,
            air_beer_k: 1.0 / 900.0,
            beer_air_k: 1.0 / 5400.0,
            cool_rate: 0.004,
            heat_rate: 0.003,
        }
    }
}

pub struct ThermalPlant {
    params: PlantParams,
    ambient_c: f64,
    beer: SimProbe,
    air: SimProbe,
    cooler: RelayHandle,
    heater: RelayHandle,
}

impl ThermalPlant {
    pub fn new(
        ambient_c: f64,
        beer: SimProbe,
        air: SimProbe,
        cooler: RelayHandle,
        heater: RelayHandle,
    ) -> Self {
        Self {
            params: PlantParams::default(),
            ambient_c,
            beer,
            air,
            cooler,
            heater,
        }
    }

    pub fn with_params(mut self, params: PlantParams) -> Self {
        self.params = params;
        self
    }

    pub fn set_ambient(&mut self, ambient_c: f64) {
        self.ambient_c = ambient_c;
    }

    /// Integrate the model forward by `dt_s` seconds (explicit Euler).
    pub fn step(&mut self, dt_s: f64) {
        let p = &self.params;
        let air = self.air.temperature();
        let beer = self.beer.temperature();
        let mut d_air = p.air_ambient_k * (self.ambient_c - air) + p.air_beer_k * (beer - air);
        if self.cooler.is_on() {
            d_air -= p.cool_rate;
        }
        if self.heater.is_on() {
            d_air += p.heat_rate;
        }
        let d_beer = p.beer_air_k * (air - beer);
        self.air.set_temperature(air + d_air * dt_s);
        self.beer.set_temperature(beer + d_beer * dt_s);
    }
}
