//! Colors used by the render modes.
//!
//! Trails and the heightmap are specified in HSL (hue in degrees, saturation
//! and lightness in [0, 1]); the raster surface stores sRGB. Conversion follows
//! the CSS `hsl()` definition so colors match what a browser canvas would draw.

/// sRGB color with components in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Srgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Srgb {
    pub const BLACK: Srgb = Srgb {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };
    pub const WHITE: Srgb = Srgb {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };
}

/// HSL color: hue in degrees (any value, wrapped), saturation and lightness in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsl {
    pub h: f64,
    pub s: f64,
    pub l: f64,
}

impl Hsl {
    pub fn new(h: f64, s: f64, l: f64) -> Self {
        Self { h, s, l }
    }
}

/// Wraps an angle in degrees into [0, 360).
pub fn wrap_degrees(h: f64) -> f64 {
    let r = h.rem_euclid(360.0);
    if r >= 360.0 {
        0.0
    } else {
        r
    }
}

/// Converts HSL to sRGB using the CSS color-module algorithm.
pub fn hsl_to_srgb(c: Hsl) -> Srgb {
    let h = c.h.rem_euclid(360.0) / 360.0;
    let s = c.s.clamp(0.0, 1.0);
    let l = c.l.clamp(0.0, 1.0);
    if s == 0.0 {
        return Srgb { r: l, g: l, b: l };
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    Srgb {
        r: hue_to_channel(p, q, h + 1.0 / 3.0),
        g: hue_to_channel(p, q, h),
        b: hue_to_channel(p, q, h - 1.0 / 3.0),
    }
}

fn hue_to_channel(p: f64, q: f64, t: f64) -> f64 {
    let t = if t < 0.0 {
        t + 1.0
    } else if t > 1.0 {
        t - 1.0
    } else {
        t
    };
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}
