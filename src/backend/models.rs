//! Static model catalog and request shaping per backend family

/// Which kind of backend renders a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendFamily {
    /// Self-hosted generation servers from the registry
    GenerationServer,
    /// Third-party provider that takes aspect ratios instead of sizes
    Alternate,
}

/// Catalog entry for a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: &'static str,
    pub family: BackendFamily,
    /// Pixel count the model renders best at
    pub ideal_pixels: u32,
}

pub const DEFAULT_MODEL: &str = "flux";

static MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "flux",
        family: BackendFamily::GenerationServer,
        ideal_pixels: 1024 * 1024,
    },
    ModelInfo {
        name: "turbo",
        family: BackendFamily::GenerationServer,
        ideal_pixels: 768 * 768,
    },
    ModelInfo {
        name: "flux-pro",
        family: BackendFamily::Alternate,
        ideal_pixels: 1024 * 1024,
    },
    ModelInfo {
        name: "flux-realism",
        family: BackendFamily::Alternate,
        ideal_pixels: 1024 * 1024,
    },
];

/// Aspect ratios accepted by the alternate provider
static ASPECT_RATIOS: &[(&str, f64)] = &[
    ("1:1", 1.0),
    ("16:9", 16.0 / 9.0),
    ("9:16", 9.0 / 16.0),
    ("4:3", 4.0 / 3.0),
    ("3:4", 3.0 / 4.0),
    ("3:2", 3.0 / 2.0),
    ("2:3", 2.0 / 3.0),
    ("21:9", 21.0 / 9.0),
    ("9:21", 9.0 / 21.0),
];

/// Resolve a model name, falling back to the default model
pub fn lookup(model: &str) -> &'static ModelInfo {
    let model = model.trim().to_lowercase();
    MODELS
        .iter()
        .find(|m| m.name == model)
        .or_else(|| MODELS.iter().find(|m| m.name == DEFAULT_MODEL))
        .unwrap_or(&MODELS[0])
}

/// All known model names
pub fn names() -> Vec<&'static str> {
    MODELS.iter().map(|m| m.name).collect()
}

impl ModelInfo {
    /// Scale a requested size to this model's ideal pixel count, keeping the
    /// aspect ratio and rounding both sides to multiples of 8
    pub fn native_size(&self, width: u32, height: u32) -> (u32, u32) {
        let width = width.max(1) as f64;
        let height = height.max(1) as f64;
        let scale = (self.ideal_pixels as f64 / (width * height)).sqrt();

        (round_to_8(width * scale), round_to_8(height * scale))
    }
}

fn round_to_8(value: f64) -> u32 {
    (((value / 8.0).round() as u32) * 8).max(64)
}

/// Nearest supported aspect ratio, compared on a log scale so that 2:1 and
/// 1:2 are equally far from 1:1
pub fn snap_aspect_ratio(width: u32, height: u32) -> &'static str {
    let target = (width.max(1) as f64 / height.max(1) as f64).ln();

    ASPECT_RATIOS
        .iter()
        .min_by(|a, b| {
            let da = (a.1.ln() - target).abs();
            let db = (b.1.ln() - target).abs();
            da.total_cmp(&db)
        })
        .map(|(label, _)| *label)
        .unwrap_or("1:1")
}
