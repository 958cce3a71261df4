use crate::{
    config::{Config, Units},
    raster::Raster,
    util::truncate_body,
};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use log::{debug, info};
use serde::{de, Deserialize, Deserializer};
use std::{io::Read, time::Duration};

const API_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
const ICON_HOST: &str = "http://openweathermap.org";

/// Gotta know weather or not it's gonna rain
#[derive(Debug)]
pub struct Weather {
    agent: ureq::Agent,
    api_url: String,
    icon_host: String,
    api_key: String,
    zip: String,
    units: Units,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Error fetching {url}")]
    Request {
        url: String,
        #[source]
        source: Box<ureq::Transport>,
    },
    #[error("Request to {url} failed with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("Error reading response from {url}")]
    Read {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Error parsing weather response")]
    Decode(#[from] serde_json::Error),
    #[error("Icon from {url} is bigger than {limit} bytes")]
    IconTooLarge { url: String, limit: u64 },
    #[error("Error decoding weather icon")]
    Image(#[from] png::DecodingError),
}

impl Weather {
    const TIMEOUT: Duration = Duration::from_secs(10);
    /// Icons are ~5KB, anything much bigger than that is bogus
    const MAX_ICON_BYTES: u64 = 1024 * 1024;

    pub fn new(config: &Config) -> Self {
        Self::with_urls(config, API_URL, ICON_HOST)
    }

    /// Point the client at a different server, e.g. a local one
    fn with_urls(config: &Config, api_url: &str, icon_host: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Self::TIMEOUT)
            .user_agent(concat!("weatherdash/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            api_url: api_url.into(),
            icon_host: icon_host.into(),
            api_key: config.api_key.clone(),
            zip: format!("{},{}", config.zip_code, config.country),
            units: config.units,
        }
    }

    /// Fetch current conditions for the configured location
    pub fn current(&self) -> Result<WeatherSnapshot, FetchError> {
        info!("Fetching current weather for {}", self.zip);
        let request = self
            .agent
            .get(&self.api_url)
            .query("zip", &self.zip)
            .query("appid", &self.api_key)
            .query("units", self.units.as_str());
        // Don't use the request URL in errors, it has the API key in it
        let response = call(request, &self.api_url)?;
        let body = response.into_string().map_err(|source| FetchError::Read {
            url: self.api_url.clone(),
            source,
        })?;
        let snapshot = WeatherSnapshot::from_json(&body)?;
        info!(
            "Received weather for {} (city {}, code {}): condition {} ({})",
            snapshot.name,
            snapshot.id,
            snapshot.cod,
            snapshot.condition.id,
            snapshot.condition.main
        );
        debug!("Received weather: {snapshot:?}");
        Ok(snapshot)
    }

    /// Fetch and decode the icon for a condition
    pub fn icon(&self, icon: &str) -> Result<Raster, FetchError> {
        let url = format!("{}/img/wn/{icon}@2x.png", self.icon_host);
        info!("Fetching weather icon from {url}");
        let response = call(self.agent.get(&url), &url)?;
        let mut bytes = Vec::new();
        // One byte past the limit is enough to know it's too big
        response
            .into_reader()
            .take(Self::MAX_ICON_BYTES + 1)
            .read_to_end(&mut bytes)
            .map_err(|source| FetchError::Read {
                url: url.clone(),
                source,
            })?;
        if bytes.len() as u64 > Self::MAX_ICON_BYTES {
            return Err(FetchError::IconTooLarge {
                url,
                limit: Self::MAX_ICON_BYTES,
            });
        }
        Ok(Raster::from_png(&bytes)?)
    }
}

/// Send a request, splitting out error statuses from transport failures
fn call(
    request: ureq::Request,
    url: &str,
) -> Result<ureq::Response, FetchError> {
    match request.call() {
        Ok(response) => Ok(response),
        Err(ureq::Error::Status(status, response)) => {
            // The API puts a helpful message in the body, e.g. bad API key
            let body = response.into_string().unwrap_or_default();
            Err(FetchError::Status {
                url: url.into(),
                status,
                body: truncate_body(&body),
            })
        }
        Err(ureq::Error::Transport(transport)) => Err(FetchError::Request {
            url: url.into(),
            source: Box::new(transport),
        }),
    }
}

/// One reading of current conditions.
/// https://openweathermap.org/current#fields_json
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct WeatherSnapshot {
    pub coord: Coordinates,
    /// The API sends a list, but only the first entry is the primary
    /// condition. An empty list is rejected.
    #[serde(rename = "weather", deserialize_with = "first_condition")]
    pub condition: Condition,
    pub main: Measurements,
    #[serde(default)]
    pub visibility: u32,
    pub wind: Wind,
    #[serde(default)]
    pub clouds: Clouds,
    pub dt: i64,
    pub sys: Sys,
    /// Shift from UTC for the location, in seconds
    pub timezone: i32,
    pub id: i64,
    pub name: String,
    pub cod: i32,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Condition {
    pub id: i32,
    pub main: String,
    pub description: String,
    pub icon: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Measurements {
    pub temp: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    /// hPa
    pub pressure: u32,
    /// %
    pub humidity: u8,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Wind {
    pub speed: f64,
    /// Direction the wind is coming from, degrees clockwise from north
    pub deg: f64,
    /// Only present when it's gusty
    #[serde(default)]
    pub gust: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Clouds {
    /// Cloud cover, %
    pub all: u8,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Sys {
    #[serde(default)]
    pub country: String,
    pub sunrise: i64,
    pub sunset: i64,
}

impl WeatherSnapshot {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// UTC offset of the location. The API guarantees this is within a day
    /// of UTC, but fall back to UTC if it isn't.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.timezone).unwrap_or_else(|| Utc.fix())
    }

    /// When the reading was taken
    pub fn observed(&self) -> Option<DateTime<FixedOffset>> {
        self.local_time(self.dt)
    }

    pub fn sunrise(&self) -> Option<DateTime<FixedOffset>> {
        self.local_time(self.sys.sunrise)
    }

    pub fn sunset(&self) -> Option<DateTime<FixedOffset>> {
        self.local_time(self.sys.sunset)
    }

    /// Convert an epoch timestamp to wall-clock time at the location
    fn local_time(&self, timestamp: i64) -> Option<DateTime<FixedOffset>> {
        DateTime::from_timestamp(timestamp, 0)
            .map(|time| time.with_timezone(&self.offset()))
    }
}

fn first_condition<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Condition, D::Error> {
    let conditions = Vec::<Condition>::deserialize(deserializer)?;
    conditions
        .into_iter()
        .next()
        .ok_or_else(|| de::Error::invalid_length(0, &"at least one condition"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::{
        io::{BufRead, BufReader, Write},
        net::TcpListener,
        sync::mpsc,
        thread,
    };

    /// A real-ish response, with knobs for the values tests care about
    pub fn payload(
        deg: f64,
        temp: f64,
        temp_min: f64,
        temp_max: f64,
    ) -> serde_json::Value {
        json!({
            "coord": {"lon": -71.1167, "lat": 42.35},
            "weather": [
                {
                    "id": 801,
                    "main": "Clouds",
                    "description": "few clouds",
                    "icon": "02d"
                }
            ],
            "base": "stations",
            "main": {
                "temp": temp,
                "feels_like": 71.8,
                "temp_min": temp_min,
                "temp_max": temp_max,
                "pressure": 1016,
                "humidity": 52,
                "sea_level": 1016,
                "grnd_level": 1012
            },
            "visibility": 10000,
            "wind": {"speed": 8.05, "deg": deg, "gust": 14.97},
            "clouds": {"all": 20},
            "dt": 1717250000,
            "sys": {
                "type": 2,
                "id": 2013408,
                "country": "US",
                "sunrise": 1717236000,
                "sunset": 1717289700
            },
            "timezone": -14400,
            "id": 4931972,
            "name": "Brighton",
            "cod": 200
        })
    }

    pub fn snapshot(
        deg: f64,
        temp: f64,
        temp_min: f64,
        temp_max: f64,
    ) -> WeatherSnapshot {
        let json = payload(deg, temp, temp_min, temp_max).to_string();
        WeatherSnapshot::from_json(&json).unwrap()
    }

    #[test]
    fn test_decode() {
        let snapshot = snapshot(45.0, 72.5, 68.0, 77.0);
        assert_eq!(
            snapshot,
            WeatherSnapshot {
                coord: Coordinates {
                    lat: 42.35,
                    lon: -71.1167
                },
                condition: Condition {
                    id: 801,
                    main: "Clouds".into(),
                    description: "few clouds".into(),
                    icon: "02d".into(),
                },
                main: Measurements {
                    temp: 72.5,
                    feels_like: 71.8,
                    temp_min: 68.0,
                    temp_max: 77.0,
                    pressure: 1016,
                    humidity: 52,
                },
                visibility: 10000,
                wind: Wind {
                    speed: 8.05,
                    deg: 45.0,
                    gust: 14.97,
                },
                clouds: Clouds { all: 20 },
                dt: 1717250000,
                sys: Sys {
                    country: "US".into(),
                    sunrise: 1717236000,
                    sunset: 1717289700,
                },
                timezone: -14400,
                id: 4931972,
                name: "Brighton".into(),
                cod: 200,
            }
        );
    }

    #[test]
    fn test_decode_only_first_condition() {
        let mut payload = payload(0.0, 50.0, 50.0, 50.0);
        payload["weather"]
            .as_array_mut()
            .unwrap()
            .push(json!({
                "id": 500,
                "main": "Rain",
                "description": "light rain",
                "icon": "10d"
            }));
        let snapshot =
            WeatherSnapshot::from_json(&payload.to_string()).unwrap();
        assert_eq!(snapshot.condition.main, "Clouds");
    }

    #[test]
    fn test_decode_no_conditions() {
        let mut payload = payload(0.0, 50.0, 50.0, 50.0);
        payload["weather"] = json!([]);
        let err = WeatherSnapshot::from_json(&payload.to_string()).unwrap_err();
        assert!(err.is_data());
        assert!(err.to_string().contains("at least one condition"), "{err}");
    }

    #[test]
    fn test_decode_calm() {
        // No gust, no clouds block, and integer degrees
        let mut payload = payload(0.0, 50.0, 50.0, 50.0);
        payload["wind"] = json!({"speed": 0, "deg": 0});
        payload.as_object_mut().unwrap().remove("clouds");
        let snapshot =
            WeatherSnapshot::from_json(&payload.to_string()).unwrap();
        assert_eq!(
            snapshot.wind,
            Wind {
                speed: 0.0,
                deg: 0.0,
                gust: 0.0
            }
        );
        assert_eq!(snapshot.clouds, Clouds::default());
    }

    #[test]
    fn test_decode_missing_field() {
        let mut payload = payload(0.0, 50.0, 50.0, 50.0);
        payload.as_object_mut().unwrap().remove("main");
        assert!(WeatherSnapshot::from_json(&payload.to_string()).is_err());
    }

    #[test]
    fn test_local_times() {
        let snapshot = snapshot(0.0, 50.0, 50.0, 50.0);
        assert_eq!(
            snapshot.sunrise().unwrap().to_rfc3339(),
            "2024-06-01T06:00:00-04:00"
        );
        assert_eq!(
            snapshot.sunset().unwrap().to_rfc3339(),
            "2024-06-01T20:55:00-04:00"
        );
        assert_eq!(
            snapshot.observed().unwrap().to_rfc3339(),
            "2024-06-01T09:53:20-04:00"
        );
    }

    fn config() -> Config {
        let vars = [
            ("WEATHER_API_KEY", "secret-key"),
            ("ZIPCODE", "02134"),
            ("COUNTRY", "US"),
        ];
        Config::from_lookup(|key| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
        })
        .unwrap()
    }

    /// Answer a single request on a local port with a canned response.
    /// Returns the server's base URL, and a channel that gets the request
    /// line once it's been read.
    fn serve_once(
        status: &'static str,
        body: Vec<u8>,
    ) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            // Skip headers, up to the blank line
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 2 {
                line.clear();
            }
            let _ = sender.send(request_line);

            let mut stream = reader.into_inner();
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\n\
                Connection: close\r\n\r\n",
                body.len()
            );
            // The client can hang up without reading the whole body
            let _ = stream
                .write_all(head.as_bytes())
                .and_then(|()| stream.write_all(&body));
        });
        (format!("http://{address}"), receiver)
    }

    fn client(base: &str) -> Weather {
        Weather::with_urls(
            &config(),
            &format!("{base}/data/2.5/weather"),
            base,
        )
    }

    #[test]
    fn test_current() {
        let body = payload(45.0, 72.5, 68.0, 77.0).to_string();
        let (base, request) = serve_once("200 OK", body.into_bytes());

        let received = client(&base).current().unwrap();
        assert_eq!(received, snapshot(45.0, 72.5, 68.0, 77.0));

        let request = request.recv().unwrap();
        assert!(request.starts_with("GET /data/2.5/weather?"), "{request}");
        assert!(request.contains("appid=secret-key"), "{request}");
        assert!(request.contains("units=imperial"), "{request}");
    }

    #[test]
    fn test_current_error_status() {
        let body = format!(
            r#"{{"cod":401,"message":"Invalid API key. {}"}}"#,
            "x".repeat(500)
        );
        let (base, _) = serve_once("401 Unauthorized", body.into_bytes());
        let client = client(&base);

        let err = client.current().unwrap_err();
        // The request URL has the API key in it, so it can't be in the error
        assert!(!err.to_string().contains("secret-key"), "{err}");
        match err {
            FetchError::Status { url, status, body } => {
                assert_eq!(url, client.api_url);
                assert_eq!(status, 401);
                assert!(body.starts_with(r#"{"cod":401,"#), "{body}");
                assert!(body.ends_with("..."), "{body}");
                assert_eq!(body.len(), 203);
            }
            other => panic!("Expected status error, got {other:?}"),
        }
    }

    #[test]
    fn test_current_connection_refused() {
        // Grab a free port, then close it so nothing is listening there
        let address = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let err = client(&format!("http://{address}")).current().unwrap_err();
        assert!(matches!(err, FetchError::Request { .. }), "{err:?}");
    }

    #[test]
    fn test_current_bad_json() {
        let (base, _) = serve_once("200 OK", b"{\"cod\": 200}".to_vec());
        let err = client(&base).current().unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)), "{err:?}");
    }

    #[test]
    fn test_icon() {
        let icon = Raster::new(3, 2);
        let (base, request) = serve_once("200 OK", icon.to_png().unwrap());
        assert_eq!(client(&base).icon("02d").unwrap(), icon);
        let request = request.recv().unwrap();
        assert!(request.starts_with("GET /img/wn/02d@2x.png "), "{request}");
    }

    #[test]
    fn test_icon_not_png() {
        let (base, _) = serve_once("200 OK", b"<html>oops</html>".to_vec());
        let err = client(&base).icon("02d").unwrap_err();
        assert!(matches!(err, FetchError::Image(_)), "{err:?}");
    }

    #[test]
    fn test_icon_too_large() {
        let body = vec![0; Weather::MAX_ICON_BYTES as usize + 1];
        let (base, _) = serve_once("200 OK", body);
        let err = client(&base).icon("02d").unwrap_err();
        assert!(
            matches!(
                err,
                FetchError::IconTooLarge {
                    limit: Weather::MAX_ICON_BYTES,
                    ..
                }
            ),
            "{err:?}"
        );
    }

    #[test]
    fn test_icon_missing() {
        let (base, _) = serve_once("404 Not Found", b"not found".to_vec());
        let err = client(&base).icon("99x").unwrap_err();
        assert!(
            matches!(err, FetchError::Status { status: 404, .. }),
            "{err:?}"
        );
    }
}
