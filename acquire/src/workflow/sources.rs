//! Maps source URIs onto capture capabilities.
//!
//! - `tcp://host:port/NET_STA,NET_STA:LOC.CHA?timeout_ms=2000`
//! - `serial:///dev/ttyUSB0?baud=9600&rate=50&block=50&net=XX&sta=SER&loc=&cha=HHZ`
//! - `synthetic://NET.STA.LOC.CHA?rate=100&block=100&freq=1&seed=0&realtime=true&fail_every=50`

use anyhow::{anyhow, bail, Context};
use feedcore::acquisition::devices::{
    NetworkCapture, SerialCapture, SerialConfig, SyntheticCapture, SyntheticConfig,
};
use feedcore::acquisition::{AcquisitionSource, RetryPolicy, TraceSource};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

const DEFAULT_STREAM_TIMEOUT_MS: u64 = 2000;

/// Builds an unstarted source for `uri`. Bad URIs and parameters fail here,
/// before any thread is spawned.
pub fn build_source(uri: &str, policy: &RetryPolicy) -> anyhow::Result<Box<dyn TraceSource>> {
    let url = Url::parse(uri).with_context(|| format!("parsing source uri {}", uri))?;
    let params = Params::from_url(&url);
    let name = source_name(&url);

    let source: Box<dyn TraceSource> = match url.scheme() {
        "tcp" => {
            let host = url
                .host_str()
                .ok_or_else(|| anyhow!("{}: missing host", uri))?;
            let port = url.port().ok_or_else(|| anyhow!("{}: missing port", uri))?;
            let selectors: Vec<&str> = url
                .path()
                .trim_matches('/')
                .split(',')
                .filter(|s| !s.is_empty())
                .collect();
            let timeout =
                Duration::from_millis(params.get("timeout_ms", DEFAULT_STREAM_TIMEOUT_MS)?);
            let capture = NetworkCapture::new(host, port, selectors.as_slice(), timeout)
                .with_context(|| format!("configuring stream source {}", uri))?;
            Box::new(AcquisitionSource::new(name, capture, policy.clone()))
        }
        "serial" => {
            let defaults = SerialConfig::default();
            let config = SerialConfig {
                device: url.path().to_string(),
                baud_rate: params.get("baud", defaults.baud_rate)?,
                sample_rate: params.get("rate", defaults.sample_rate)?,
                block_len: params.get("block", defaults.block_len)?,
                read_timeout_ms: params.get("timeout_ms", defaults.read_timeout_ms)?,
                network: params.text("net", &defaults.network),
                station: params.text("sta", &defaults.station),
                location: params.text("loc", &defaults.location),
                channel: params.text("cha", &defaults.channel),
            };
            let capture = SerialCapture::new(config)
                .with_context(|| format!("configuring serial source {}", uri))?;
            Box::new(AcquisitionSource::new(name, capture, policy.clone()))
        }
        "synthetic" => {
            let codes = url
                .host_str()
                .ok_or_else(|| anyhow!("{}: expected NET.STA.LOC.CHA", uri))?;
            let parts: Vec<&str> = codes.split('.').collect();
            let [network, station, location, channel] = parts.as_slice() else {
                bail!("{}: expected NET.STA.LOC.CHA, got {}", uri, codes);
            };
            let defaults = SyntheticConfig::default();
            let config = SyntheticConfig {
                network: network.to_string(),
                station: station.to_string(),
                location: location.to_string(),
                channel: channel.to_string(),
                sample_rate: params.get("rate", defaults.sample_rate)?,
                block_len: params.get("block", defaults.block_len)?,
                frequency: params.get("freq", defaults.frequency)?,
                amplitude: params.get("amp", defaults.amplitude)?,
                noise: params.get("noise", defaults.noise)?,
                seed: params.get("seed", defaults.seed)?,
                fail_every: params.optional("fail_every")?,
            };
            let realtime = params.get("realtime", true)?;
            let capture = SyntheticCapture::new(config.clone())
                .with_context(|| format!("configuring synthetic source {}", uri))?;
            let mut policy = policy.clone();
            if realtime {
                let seconds = config.block_len as f64 / config.sample_rate;
                let block = Duration::try_from_secs_f64(seconds)
                    .with_context(|| format!("{}: block duration out of range", uri))?;
                policy = policy.with_throttle(block);
            }
            Box::new(AcquisitionSource::new(name, capture, policy))
        }
        other => bail!("{}: unsupported source scheme '{}'", uri, other),
    };
    Ok(source)
}

fn source_name(url: &Url) -> String {
    match url.host_str().filter(|host| !host.is_empty()) {
        Some(host) => match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        },
        None => format!("{}://{}", url.scheme(), url.path()),
    }
}

struct Params {
    values: HashMap<String, String>,
}

impl Params {
    fn from_url(url: &Url) -> Self {
        Self {
            values: url.query_pairs().into_owned().collect(),
        }
    }

    fn get<T>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.values.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|err| anyhow!("invalid value '{}' for {}: {}", raw, key, err)),
        }
    }

    fn optional<T>(&self, key: &str) -> anyhow::Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.values
            .get(key)
            .map(|raw| {
                raw.parse()
                    .map_err(|err| anyhow!("invalid value '{}' for {}: {}", raw, key, err))
            })
            .transpose()
    }

    fn text(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedcore::acquisition::SourceState;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    #[test]
    fn synthetic_uri_builds_unstarted_source() {
        let source =
            build_source("synthetic://XX.SYN..HHZ?rate=20&block=10", &policy()).unwrap();
        assert_eq!(source.name(), "synthetic://XX.SYN..HHZ");
        assert_eq!(source.state(), SourceState::Created);
    }

    #[test]
    fn synthetic_source_delivers_traces() {
        let mut source = build_source(
            "synthetic://XX.SYN.00.HHZ?rate=1000&block=10",
            &policy(),
        )
        .unwrap();
        source.start().unwrap();
        let mut traces = Vec::new();
        while traces.is_empty() {
            traces.extend(source.poll());
            std::thread::sleep(Duration::from_millis(1));
        }
        source.stop();
        assert_eq!(traces[0].location, "00");
        assert_eq!(traces[0].samples.len(), 10);
    }

    #[test]
    fn synthetic_scripted_failures_are_retried() {
        let policy = RetryPolicy::default().with_backoff(Duration::from_millis(5));
        let mut source = build_source(
            "synthetic://XX.SYN..HHZ?rate=1000&block=10&fail_every=2",
            &policy,
        )
        .unwrap();
        source.start().unwrap();
        let mut traces = Vec::new();
        while source.stats().restarts < 2 {
            traces.extend(source.poll());
            std::thread::sleep(Duration::from_millis(1));
        }
        source.stop();
        traces.extend(source.poll());
        assert!(source.stats().failures >= 2);
        assert!(!traces.is_empty());
    }

    #[test]
    fn out_of_range_synthetic_values_are_rejected() {
        assert!(build_source("synthetic://XX.SYN..HHZ?noise=inf", &policy()).is_err());
        assert!(build_source("synthetic://XX.SYN..HHZ?fail_every=0", &policy()).is_err());
        assert!(build_source("synthetic://XX.SYN..HHZ?rate=1e-300&block=10", &policy()).is_err());
    }

    #[test]
    fn zero_stream_timeout_is_rejected() {
        assert!(build_source("tcp://localhost:18000/GE_APE?timeout_ms=0", &policy()).is_err());
    }

    #[test]
    fn tcp_uri_requires_valid_selectors() {
        assert!(build_source("tcp://localhost:18000/GE_APE,GE_MORC:.BH*", &policy()).is_ok());
        assert!(build_source("tcp://localhost:18000/", &policy()).is_err());
        assert!(build_source("tcp://localhost:18000/NOSTATION", &policy()).is_err());
        assert!(build_source("tcp://localhost/GE_APE", &policy()).is_err());
    }

    #[test]
    fn serial_uri_reads_device_path_and_parameters() {
        assert!(build_source("serial:///dev/ttyUSB0?baud=19200&rate=100", &policy()).is_ok());
        assert!(build_source("serial:///dev/ttyUSB0?rate=fast", &policy()).is_err());
        assert!(build_source("serial:///dev/ttyUSB0?block=0", &policy()).is_err());
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(build_source("ftp://example.org/file", &policy()).is_err());
        assert!(build_source("not a uri", &policy()).is_err());
    }
}
