use crate::{
    compass::{CompassStyle, MAX_SIZE, MIN_SIZE},
    util::Color,
};
use anyhow::{anyhow, bail, Context};
use embedded_graphics::prelude::Size;
use std::{env, fmt::Display, path::PathBuf, str::FromStr};

/// Everything the dashboard needs from the outside world. Loaded from
/// environment variables, with a `.env` file in the working directory
/// filling in anything that isn't already set.
#[derive(Debug)]
pub struct Config {
    pub api_key: String,
    pub zip_code: String,
    pub country: String,
    pub units: Units,
    /// `None` if the compass panel is turned off
    pub compass: Option<CompassConfig>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug)]
pub struct CompassConfig {
    pub style: CompassStyle,
    /// Where to save a copy of the compass image, if anywhere
    pub path: Option<PathBuf>,
}

/// Unit system the API reports in. This is passed straight through as the
/// `units` query param.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Units {
    Standard,
    Metric,
    #[default]
    Imperial,
}

impl Config {
    const API_KEY: &'static str = "WEATHER_API_KEY";
    const ZIP_CODE: &'static str = "ZIPCODE";
    const COUNTRY: &'static str = "COUNTRY";
    const UNITS: &'static str = "WEATHER_UNITS";
    const COMPASS: &'static str = "COMPASS";
    const COMPASS_SIZE: &'static str = "COMPASS_SIZE";
    const COMPASS_PATH: &'static str = "COMPASS_PATH";
    const COMPASS_OUTER_COLOR: &'static str = "COMPASS_OUTER_COLOR";
    const COMPASS_INNER_COLOR: &'static str = "COMPASS_INNER_COLOR";
    const LOG_FILE: &'static str = "LOG_FILE";
    const DEFAULT_COMPASS_SIZE: u32 = 100;

    /// Load config from the process environment
    pub fn load() -> anyhow::Result<Self> {
        // A missing .env is fine, everything might be in the real env. This
        // runs before logging is set up, so there's nothing to log to yet.
        match dotenv::dotenv() {
            Ok(_) => {}
            Err(err) if err.not_found() => {}
            Err(err) => return Err(err).context("Error loading .env file"),
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build config from any key-value source. Empty values are treated the
    /// same as missing ones.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| {
                anyhow!("Missing required environment variable `{key}`")
            })
        };

        let compass_enabled = match get(Self::COMPASS) {
            None => true,
            Some(value) => parse_switch(Self::COMPASS, &value)?,
        };
        let compass = if compass_enabled {
            let edge: u32 = parse_optional(Self::COMPASS_SIZE, get)?
                .unwrap_or(Self::DEFAULT_COMPASS_SIZE);
            if !(MIN_SIZE..=MAX_SIZE).contains(&edge) {
                bail!(
                    "`{}` must be between {} and {}, got {edge}",
                    Self::COMPASS_SIZE,
                    MIN_SIZE,
                    MAX_SIZE
                );
            }
            let mut style = CompassStyle::for_size(Size::new(edge, edge));
            if let Some(color) =
                parse_optional(Self::COMPASS_OUTER_COLOR, get)?
            {
                style.outer_color = color;
            }
            if let Some(color) =
                parse_optional(Self::COMPASS_INNER_COLOR, get)?
            {
                style.inner_color = color;
            }
            Some(CompassConfig {
                style,
                path: get(Self::COMPASS_PATH).map(PathBuf::from),
            })
        } else {
            None
        };

        Ok(Self {
            api_key: required(Self::API_KEY)?,
            zip_code: required(Self::ZIP_CODE)?,
            country: required(Self::COUNTRY)?,
            units: parse_optional(Self::UNITS, get)?.unwrap_or_default(),
            compass,
            log_file: get(Self::LOG_FILE).map(PathBuf::from),
        })
    }
}

/// Parse an optional variable, with a helpful error if it's set but bogus
fn parse_optional<T>(
    key: &str,
    get: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    get(key)
        .map(|value| {
            value.parse::<T>().map_err(|err| {
                anyhow!("Invalid value `{value}` for `{key}`: {err}")
            })
        })
        .transpose()
}

fn parse_switch(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        _ => Err(anyhow!(
            "Invalid value `{value}` for `{key}`, expected on/off"
        )),
    }
}

impl Units {
    /// Value for the API's `units` query param
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Metric => "metric",
            Self::Imperial => "imperial",
        }
    }

    pub fn temperature_symbol(self) -> &'static str {
        match self {
            Self::Standard => "K",
            Self::Metric => "°C",
            Self::Imperial => "°F",
        }
    }

    pub fn speed_symbol(self) -> &'static str {
        match self {
            Self::Standard | Self::Metric => "m/s",
            Self::Imperial => "mph",
        }
    }
}

impl FromStr for Units {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "metric" => Ok(Self::Metric),
            "imperial" => Ok(Self::Imperial),
            _ => Err(anyhow!("expected standard, metric, or imperial")),
        }
    }
}
