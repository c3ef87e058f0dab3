use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::{Coordinates, MetricType};

/// Stand-in values used whenever the live provider cannot answer.
///
/// With a seed, a value depends only on the seed, metric, coordinates and
/// date. Without one, every call draws fresh values.
#[derive(Clone, Debug)]
pub struct Simulator {
    seed: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SimulatedReading {
    pub value: f64,
    pub components: BTreeMap<String, f64>,
}

impl Simulator {
    pub fn new(seed: Option<u64>) -> Self {
        Self { seed }
    }

    pub fn simulate(
        &self,
        metric: MetricType,
        at: Coordinates,
        date: Option<NaiveDate>,
    ) -> SimulatedReading {
        match self.seed {
            Some(seed) => {
                let date = date.unwrap_or_else(|| Utc::now().date_naive());
                let mut hasher = DefaultHasher::new();
                seed.hash(&mut hasher);
                metric.hash(&mut hasher);
                at.latitude.to_bits().hash(&mut hasher);
                at.longitude.to_bits().hash(&mut hasher);
                date.hash(&mut hasher);
                draw(metric, &mut StdRng::seed_from_u64(hasher.finish()))
            }
            None => draw(metric, &mut rand::thread_rng()),
        }
    }
}

fn draw<R: Rng>(metric: MetricType, rng: &mut R) -> SimulatedReading {
    let (value, components) = match metric {
        MetricType::AirQuality => (
            rng.gen_range(50..=150) as f64,
            vec![
                ("no2", rng.gen_range(10.0..50.0)),
                ("o3", rng.gen_range(20.0..80.0)),
                ("pm25", rng.gen_range(5.0..35.0)),
                ("so2", rng.gen_range(1.0..15.0)),
            ],
        ),
        MetricType::Groundwater => (
            rng.gen_range(-20.0..20.0),
            vec![
                ("precipitation", rng.gen_range(0.0..15.0)),
                ("flood_risk", rng.gen_range(0.0..=1.0)),
            ],
        ),
        MetricType::Vegetation => (
            rng.gen_range(0.2..0.8),
            vec![
                ("evi", rng.gen_range(0.1..0.6)),
                ("green_coverage", rng.gen_range(15.0..65.0)),
                ("surface_temperature", rng.gen_range(20.0..35.0)),
            ],
        ),
    };
    SimulatedReading {
        value,
        components: components
            .into_iter()
            .map(|(name, v)| (name.to_string(), v))
            .collect(),
    }
}
