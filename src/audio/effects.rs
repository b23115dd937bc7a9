use serde_json::{json, Map, Value};
use std::{collections::BTreeSet, fmt, str::FromStr};

use crate::error::ValidationError;

/// Presets de filtros disponibles.
///
/// El orden de declaración es el orden de composición: si dos presets tocan
/// la misma clave, gana el que aparece después.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterPreset {
    BassBoost,
    Soft,
    Karaoke,
    Tremolo,
    Vibrato,
    LowPass,
    EightD,
    Vaporwave,
    Nightcore,
}

impl FilterPreset {
    pub const ALL: [FilterPreset; 9] = [
        FilterPreset::BassBoost,
        FilterPreset::Soft,
        FilterPreset::Karaoke,
        FilterPreset::Tremolo,
        FilterPreset::Vibrato,
        FilterPreset::LowPass,
        FilterPreset::EightD,
        FilterPreset::Vaporwave,
        FilterPreset::Nightcore,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FilterPreset::BassBoost => "bassboost",
            FilterPreset::Soft => "soft",
            FilterPreset::Karaoke => "karaoke",
            FilterPreset::Tremolo => "tremolo",
            FilterPreset::Vibrato => "vibrato",
            FilterPreset::LowPass => "lowpass",
            FilterPreset::EightD => "8d",
            FilterPreset::Vaporwave => "vaporwave",
            FilterPreset::Nightcore => "nightcore",
        }
    }

    /// Fragmento del objeto `filters` de Lavalink v4.
    fn payload(&self) -> Value {
        match self {
            FilterPreset::BassBoost => json!({
                "equalizer": [
                    { "band": 0, "gain": 0.25 },
                    { "band": 1, "gain": 0.2 },
                    { "band": 2, "gain": 0.15 },
                    { "band": 3, "gain": 0.1 },
                    { "band": 4, "gain": 0.05 }
                ]
            }),
            FilterPreset::Soft => json!({ "lowPass": { "smoothing": 10.0 } }),
            FilterPreset::Karaoke => json!({
                "karaoke": {
                    "level": 1.0,
                    "monoLevel": 1.0,
                    "filterBand": 220.0,
                    "filterWidth": 100.0
                }
            }),
            FilterPreset::Tremolo => json!({ "tremolo": { "frequency": 4.0, "depth": 0.75 } }),
            FilterPreset::Vibrato => json!({ "vibrato": { "frequency": 4.0, "depth": 0.75 } }),
            FilterPreset::LowPass => json!({ "lowPass": { "smoothing": 20.0 } }),
            FilterPreset::EightD => json!({ "rotation": { "rotationHz": 0.2 } }),
            FilterPreset::Vaporwave => json!({
                "timescale": { "speed": 0.85, "pitch": 0.8, "rate": 1.0 }
            }),
            FilterPreset::Nightcore => json!({
                "timescale": { "speed": 1.25, "pitch": 1.3, "rate": 1.0 }
            }),
        }
    }
}

impl fmt::Display for FilterPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterPreset {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bassboost" | "bass" => Ok(FilterPreset::BassBoost),
            "soft" => Ok(FilterPreset::Soft),
            "karaoke" => Ok(FilterPreset::Karaoke),
            "tremolo" => Ok(FilterPreset::Tremolo),
            "vibrato" => Ok(FilterPreset::Vibrato),
            "lowpass" | "low-pass" => Ok(FilterPreset::LowPass),
            "8d" | "rotation" => Ok(FilterPreset::EightD),
            "vaporwave" => Ok(FilterPreset::Vaporwave),
            "nightcore" => Ok(FilterPreset::Nightcore),
            other => Err(ValidationError::UnknownFilter(other.to_string())),
        }
    }
}

/// Conjunto de filtros activos de una sesión
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveFilters {
    presets: BTreeSet<FilterPreset>,
}

impl ActiveFilters {
    /// Activa o desactiva un preset. Devuelve `true` si el conjunto cambió.
    pub fn set(&mut self, preset: FilterPreset, enabled: bool) -> bool {
        if enabled {
            self.presets.insert(preset)
        } else {
            self.presets.remove(&preset)
        }
    }

    pub fn clear(&mut self) {
        self.presets.clear();
    }

    pub fn contains(&self, preset: FilterPreset) -> bool {
        self.presets.contains(&preset)
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.presets.iter().map(FilterPreset::name).collect()
    }

    /// Combina los presets activos en un único objeto `filters`.
    /// Un conjunto vacío produce `{}`, que limpia los filtros en el nodo.
    pub fn to_payload(&self) -> Value {
        let mut merged = Map::new();
        for preset in &self.presets {
            if let Value::Object(fields) = preset.payload() {
                merged.extend(fields);
            }
        }
        Value::Object(merged)
    }
}
