//! CLI-side configuration: TOML presets and filter chain parsing.

use color_eyre::eyre::{bail, Context, Result};
use iqpipe_core::config::FilterSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Partial configuration loaded from a TOML preset. Every field is
/// optional; command-line flags override whatever the preset sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Preset {
    pub input_sample_format: Option<String>,
    pub input_rate: Option<f64>,
    pub output_sample_format: Option<String>,
    pub output_container: Option<String>,
    pub output_rate: Option<f64>,
    pub gain: Option<f32>,
    pub freq_shift: Option<f64>,
    pub shift_after_resample: Option<bool>,
    pub dc_block: Option<bool>,
    pub iq_correction: Option<bool>,
    #[serde(default)]
    pub filter: Vec<String>,
    pub filter_fft: Option<bool>,
    pub filter_block_size: Option<usize>,
    pub no_resample: Option<bool>,
    pub raw_passthrough: Option<bool>,
}

impl Preset {
    /// Load a preset by path, or by bare name resolved against
    /// `presets/<name>.toml` next to the working directory.
    pub fn load(name_or_path: &str) -> Result<Self> {
        let direct = PathBuf::from(name_or_path);
        let path = if direct.exists() {
            direct
        } else {
            Path::new("presets").join(format!("{}.toml", name_or_path))
        };
        let content = std::fs::read_to_string(&path)
            .wrap_err_with(|| format!("Failed to read preset {}", path.display()))?;
        toml::from_str(&content)
            .wrap_err_with(|| format!("Failed to parse preset {}", path.display()))
    }
}

/// Parse one `--filter` argument.
///
/// Syntax: `lowpass:<hz>`, `highpass:<hz>`, `bandpass:<center>:<width>`,
/// `bandstop:<center>:<width>`.
pub fn parse_filter(spec: &str) -> Result<FilterSpec> {
    let parts: Vec<&str> = spec.split(':').collect();
    let freq = |s: &str| -> Result<f64> {
        s.parse::<f64>()
            .wrap_err_with(|| format!("Invalid frequency '{}' in filter '{}'", s, spec))
    };
    match parts.as_slice() {
        ["lowpass", cutoff] => Ok(FilterSpec::Lowpass {
            cutoff_hz: freq(cutoff)?,
        }),
        ["highpass", cutoff] => Ok(FilterSpec::Highpass {
            cutoff_hz: freq(cutoff)?,
        }),
        ["bandpass", center, width] => Ok(FilterSpec::Bandpass {
            center_hz: freq(center)?,
            width_hz: freq(width)?,
        }),
        ["bandstop", center, width] => Ok(FilterSpec::Bandstop {
            center_hz: freq(center)?,
            width_hz: freq(width)?,
        }),
        _ => bail!(
            "Unrecognized filter '{}' (expected lowpass:<hz>, highpass:<hz>, \
             bandpass:<center>:<width> or bandstop:<center>:<width>)",
            spec
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_filter_kinds() {
        assert_eq!(
            parse_filter("lowpass:3000").unwrap(),
            FilterSpec::Lowpass { cutoff_hz: 3000.0 }
        );
        assert_eq!(
            parse_filter("highpass:150").unwrap(),
            FilterSpec::Highpass { cutoff_hz: 150.0 }
        );
        assert_eq!(
            parse_filter("bandpass:10000:4000").unwrap(),
            FilterSpec::Bandpass {
                center_hz: 10000.0,
                width_hz: 4000.0
            }
        );
        assert_eq!(
            parse_filter("bandstop:-5000:200").unwrap(),
            FilterSpec::Bandstop {
                center_hz: -5000.0,
                width_hz: 200.0
            }
        );
    }

    #[test]
    fn rejects_malformed_filters() {
        assert!(parse_filter("lowpass").is_err());
        assert!(parse_filter("bandpass:100").is_err());
        assert!(parse_filter("notch:100:10").is_err());
        assert!(parse_filter("lowpass:fast").is_err());
    }

    #[test]
    fn preset_parses_partial_toml() {
        let preset: Preset = toml::from_str(
            r#"
            output_rate = 1000000.0
            output_sample_format = "cs16"
            dc_block = true
            filter = ["lowpass:400000"]
            "#,
        )
        .unwrap();
        assert_eq!(preset.output_rate, Some(1_000_000.0));
        assert_eq!(preset.dc_block, Some(true));
        assert_eq!(preset.filter.len(), 1);
        assert!(preset.gain.is_none());
    }

    #[test]
    fn preset_rejects_unknown_keys() {
        let parsed: std::result::Result<Preset, _> = toml::from_str("bogus_key = 1");
        assert!(parsed.is_err());
    }
}
