use bytemuck::{Pod, Zeroable};
use colorous::{Color, Gradient};
use serde::{Deserialize, Serialize};

use crate::settings::{ColorComputingMode, VisualMode};

/// Straight (non premultiplied) RGBA with channels in `[0, 1]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::new(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, a as f32 / 255.0)
    }

    pub fn from_packed(c: u32) -> Self {
        Self::from_rgba8(c as u8, (c >> 8) as u8, (c >> 16) as u8, (c >> 24) as u8)
    }

    /// `#rrggbb` or `#rrggbbaa`.
    pub fn from_hex(s: &str) -> Option<Self> {
        let hex = s.strip_prefix('#')?;
        let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        match hex.len() {
            6 => Some(Self::from_rgba8(byte(0)?, byte(2)?, byte(4)?, 255)),
            8 => Some(Self::from_rgba8(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        }
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    pub fn to_packed(self) -> u32 {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        pack_rgba8(q(self.r), q(self.g), q(self.b), q(self.a))
    }
}

impl From<Color> for Rgba {
    fn from(c: Color) -> Self {
        Self::from_rgba8(c.r, c.g, c.b, 255)
    }
}

/// Color given to genes that have not been assigned one.
pub const DEFAULT_GENE_COLOR: Rgba = Rgba::new(1.0, 65.0 / 255.0, 65.0 / 255.0, 1.0);

pub fn pack_rgba8(r: u8, g: u8, b: u8, a: u8) -> u32 {
    (r as u32) | ((g as u32) << 8) | ((b as u32) << 16) | ((a as u32) << 24)
}

/// Per channel `a + (b - a) * t`, alpha included.
pub fn lerp(t: f32, a: Rgba, b: Rgba) -> Rgba {
    Rgba::new(
        a.r + (b.r - a.r) * t,
        a.g + (b.g - a.g) * t,
        a.b + (b.b - a.b) * t,
        a.a + (b.a - a.a) * t,
    )
}

/// Map `value` into `[0, 1]` over `[min, max]` and apply the transfer
/// function of `mode`. A collapsed range maps everything to 1.
pub fn normalize_value(value: f32, min: f32, max: f32, mode: ColorComputingMode) -> f32 {
    let den = max - min;
    let t = if den <= 0.0 {
        1.0
    } else {
        ((value - min) / den).clamp(0.0, 1.0)
    };
    match mode {
        ColorComputingMode::Linear => t,
        ColorComputingMode::Log => (t + 1.0).ln() * std::f32::consts::LOG2_E,
        ColorComputingMode::Exp => t.sqrt(),
    }
}

/// Visible-spectrum color for a normalized value (0 = violet, 1 = red).
pub fn wavelength_color(t: f32) -> Rgba {
    const GAMMA: f32 = 0.8;
    let wl = 380.0 + t.clamp(0.0, 1.0) * 400.0;

    let (r, g, b) = if wl < 440.0 {
        (-(wl - 440.0) / 60.0, 0.0, 1.0)
    } else if wl < 490.0 {
        (0.0, (wl - 440.0) / 50.0, 1.0)
    } else if wl < 510.0 {
        (0.0, 1.0, -(wl - 510.0) / 20.0)
    } else if wl < 580.0 {
        ((wl - 510.0) / 70.0, 1.0, 0.0)
    } else if wl < 645.0 {
        (1.0, -(wl - 645.0) / 65.0, 0.0)
    } else {
        (1.0, 0.0, 0.0)
    };

    // intensity falls off near the vision limits
    let factor = if wl < 420.0 {
        0.3 + 0.7 * (wl - 380.0) / 40.0
    } else if wl < 700.0 {
        1.0
    } else {
        0.3 + 0.7 * (780.0 - wl) / 80.0
    };

    let adjust = |c: f32| (c * factor).powf(GAMMA).clamp(0.0, 1.0);
    Rgba::new(adjust(r), adjust(g), adjust(b), 1.0)
}

pub fn gradient_color(t: f32, grad: &Gradient) -> Rgba {
    grad.eval_continuous(t.clamp(0.0, 1.0) as f64).into()
}

/// Final color of a spot for the given visual mode. `t` is the normalized
/// pooled value.
pub fn visual_color(mode: VisualMode, base: Rgba, t: f32) -> Rgba {
    match mode {
        VisualMode::Normal => base,
        VisualMode::DynamicRange => base.with_alpha(t),
        VisualMode::HeatMap => wavelength_color(t),
        VisualMode::ColorRange => gradient_color(t, &colorous::YELLOW_ORANGE_RED),
    }
}

/// One packed color per legend row, top row = `max`.
pub fn legend_colors(height: usize, min: f32, max: f32, mode: VisualMode, color_mode: ColorComputingMode) -> Vec<u32> {
    let mut out = Vec::with_capacity(height);
    for row in 0..height {
        let frac = if height <= 1 {
            1.0
        } else {
            (height - 1 - row) as f32 / (height - 1) as f32
        };
        let value = min + frac * (max - min);
        let t = normalize_value(value, min, max, color_mode);
        let c = match mode {
            VisualMode::Normal | VisualMode::DynamicRange | VisualMode::HeatMap => wavelength_color(t),
            VisualMode::ColorRange => gradient_color(t, &colorous::YELLOW_ORANGE_RED),
        };
        out.push(c.to_packed());
    }
    out
}

fn palette_from_colors(colors: &[Color], n: usize) -> Vec<Rgba> {
    if colors.is_empty() {
        return Vec::new();
    }
    (0..n).map(|i| colors[i % colors.len()].into()).collect()
}

pub fn categorical_palette(n: usize) -> Vec<Rgba> {
    // Evenly sample TURBO for distinct-ish colors.
    (0..n)
        .map(|i| {
            let t = if n <= 1 { 0.0 } else { i as f64 / (n as f64 - 1.0) };
            colorous::TURBO.eval_continuous(t).into()
        })
        .collect()
}

/// Gene palette by name; unknown names fall back to sampled TURBO.
pub fn categorical_palette_named(name: &str, n: usize) -> Vec<Rgba> {
    match name.to_ascii_lowercase().as_str() {
        "tab10" | "category10" => palette_from_colors(&colorous::CATEGORY10, n),
        "tableau10" => palette_from_colors(&colorous::TABLEAU10, n),
        "set1" => palette_from_colors(&colorous::SET1, n),
        "set2" => palette_from_colors(&colorous::SET2, n),
        "set3" => palette_from_colors(&colorous::SET3, n),
        "dark2" => palette_from_colors(&colorous::DARK2, n),
        "paired" => palette_from_colors(&colorous::PAIRED, n),
        _ => categorical_palette(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lerp_endpoints() {
        let a = Rgba::new(0.0, 0.2, 0.4, 1.0);
        let b = Rgba::new(1.0, 0.6, 0.0, 0.0);
        assert_eq!(lerp(0.0, a, b), a);
        assert_eq!(lerp(1.0, a, b), b);
        let mid = lerp(0.5, a, b);
        assert!((mid.g - 0.4).abs() < 1e-6 && (mid.a - 0.5).abs() < 1e-6);
    }

    #[test]
    fn packed_round_trip_of_known_color() {
        assert_eq!(pack_rgba8(1, 2, 3, 4), 0x0403_0201);
        assert_eq!(Rgba::from_packed(0xff00_00ff), Rgba::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(DEFAULT_GENE_COLOR.to_packed(), pack_rgba8(255, 65, 65, 255));
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(Rgba::from_hex("#ff0000"), Some(Rgba::new(1.0, 0.0, 0.0, 1.0)));
        assert_eq!(Rgba::from_hex("#00ff0080").map(|c| c.to_packed() >> 24), Some(0x80));
        assert_eq!(Rgba::from_hex("ff0000"), None);
        assert_eq!(Rgba::from_hex("#zz0000"), None);
    }

    #[test]
    fn normalization_modes_keep_unit_interval() {
        for mode in [ColorComputingMode::Linear, ColorComputingMode::Log, ColorComputingMode::Exp] {
            assert!(normalize_value(0.0, 0.0, 10.0, mode).abs() < 1e-6);
            assert!((normalize_value(10.0, 0.0, 10.0, mode) - 1.0).abs() < 1e-6);
            assert!((normalize_value(50.0, 0.0, 10.0, mode) - 1.0).abs() < 1e-6);
        }
        assert!(normalize_value(2.5, 0.0, 10.0, ColorComputingMode::Exp) > 0.25);
        assert_eq!(normalize_value(3.0, 3.0, 3.0, ColorComputingMode::Linear), 1.0);
    }

    #[test]
    fn spectrum_ends() {
        let low = wavelength_color(0.0);
        let high = wavelength_color(1.0);
        assert!(low.b > low.g && low.r < 0.5);
        assert!(high.r > 0.0 && high.g == 0.0 && high.b == 0.0);
        assert!(wavelength_color(0.5).g > 0.9);
    }

    #[test]
    fn legend_top_row_is_max() {
        let rows = legend_colors(16, 0.0, 100.0, VisualMode::HeatMap, ColorComputingMode::Linear);
        assert_eq!(rows.len(), 16);
        assert_eq!(rows[0], wavelength_color(1.0).to_packed());
        assert_eq!(rows[15], wavelength_color(0.0).to_packed());
    }

    #[test]
    fn palettes_have_requested_len() {
        assert_eq!(categorical_palette_named("set1", 12).len(), 12);
        assert_eq!(categorical_palette_named("nope", 3).len(), 3);
        assert!(categorical_palette(0).is_empty());
    }
}
