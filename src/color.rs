use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use rand_core::{OsRng, RngCore};
use ratatui::style::Color;
use serde::{Serialize, Serializer};
use std::collections::HashMap;

use crate::model::is_system_namespace;

/// Light grey, used for every entity in a system namespace.
pub const NEUTRAL: Rgb = Rgb(211, 211, 211);

// Blue family bounds in HSV: hue in degrees, saturation and value in percent.
const HUE_RANGE: (u32, u32) = (179, 257);
const SATURATION_RANGE: (u32, u32) = (20, 100);
const VALUE_RANGE: (u32, u32) = (50, 100);

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }

    /// Dark or light text, whichever reads better on this background.
    pub fn contrast(self) -> Color {
        let luma = 299 * u32::from(self.0) + 587 * u32::from(self.1) + 114 * u32::from(self.2);
        if luma >= 150_000 {
            Color::Rgb(9, 15, 25)
        } else {
            Color::White
        }
    }
}

impl From<Rgb> for Color {
    fn from(value: Rgb) -> Self {
        Color::Rgb(value.0, value.1, value.2)
    }
}

impl Serialize for Rgb {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.hex())
    }
}

/// Session-scoped owner key → color table. Entries are never evicted.
pub struct ColorAssigner<R = OsRng> {
    colors: HashMap<String, Rgb>,
    rng: R,
}

impl ColorAssigner<OsRng> {
    pub fn new() -> Self {
        Self::with_rng(OsRng)
    }
}

impl Default for ColorAssigner<OsRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore> ColorAssigner<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            colors: HashMap::new(),
            rng,
        }
    }

    pub fn color_for(&mut self, meta: &ObjectMeta) -> Rgb {
        if meta
            .namespace
            .as_deref()
            .is_some_and(is_system_namespace)
        {
            return NEUTRAL;
        }

        let key = owner_key(meta);
        if let Some(color) = self.colors.get(&key) {
            return *color;
        }

        let color = self.generate();
        tracing::debug!(owner = %key, color = %color.hex(), "assigned owner color");
        self.colors.insert(key, color);
        color
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    fn generate(&mut self) -> Rgb {
        let hue = self.pick(HUE_RANGE) as f64;
        let saturation = self.pick(SATURATION_RANGE) as f64 / 100.0;
        let value = self.pick(VALUE_RANGE) as f64 / 100.0;
        hsv_to_rgb(hue, saturation, value)
    }

    fn pick(&mut self, (low, high): (u32, u32)) -> u32 {
        low + self.rng.next_u32() % (high - low + 1)
    }
}

/// First owner reference name, else uid, else `namespace/name`.
pub fn owner_key(meta: &ObjectMeta) -> String {
    if let Some(owner) = meta
        .owner_references
        .as_ref()
        .and_then(|owners| owners.first())
        .filter(|owner| !owner.name.is_empty())
    {
        return owner.name.clone();
    }

    if let Some(uid) = meta.uid.as_deref().filter(|uid| !uid.is_empty()) {
        return uid.to_string();
    }

    format!(
        "{}/{}",
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default()
    )
}

fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> Rgb {
    let chroma = value * saturation;
    let sector = (hue / 60.0) % 6.0;
    let x = chroma * (1.0 - (sector % 2.0 - 1.0).abs());
    let (r, g, b) = match sector as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    let offset = value - chroma;
    let channel = |component: f64| ((component + offset) * 255.0).round() as u8;
    Rgb(channel(r), channel(g), channel(b))
}
