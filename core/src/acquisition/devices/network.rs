use crate::prelude::{AcqError, AcqResult, Capture, Trace};
use glob::Pattern;
use std::fmt;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

/// Stream selection of the form `NET_STA` or `NET_STA:LOC.CHA`.
///
/// Station, location and channel accept `?` and `*` wildcards, compiled once
/// when the selector is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSelector {
    pub network: String,
    pub station: Pattern,
    pub location: Option<Pattern>,
    pub channel: Option<Pattern>,
}

impl StreamSelector {
    pub fn matches(&self, trace: &Trace) -> bool {
        self.network == trace.network
            && self.station.matches(&trace.station)
            && self
                .location
                .as_ref()
                .map_or(true, |pattern| pattern.matches(&trace.location))
            && self
                .channel
                .as_ref()
                .map_or(true, |pattern| pattern.matches(&trace.channel))
    }
}

impl FromStr for StreamSelector {
    type Err = AcqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AcqError::Configuration(format!("unresolvable stream selector '{}'", s));
        let compile = |code: &str| {
            if code.chars().all(is_pattern_char) {
                Pattern::new(code).map_err(|err| {
                    AcqError::Configuration(format!("bad pattern in selector '{}': {}", s, err))
                })
            } else {
                Err(invalid())
            }
        };

        let (netsta, locchan) = match s.split_once(':') {
            Some((netsta, locchan)) => (netsta, Some(locchan)),
            None => (s, None),
        };
        let (network, station) = netsta.split_once('_').ok_or_else(invalid)?;
        if network.is_empty() || !network.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid());
        }
        if station.is_empty() {
            return Err(invalid());
        }
        let station = compile(station)?;

        let (location, channel) = match locchan {
            None => (None, None),
            Some(locchan) => {
                let (location, channel) = locchan.split_once('.').ok_or_else(invalid)?;
                if channel.is_empty() {
                    return Err(invalid());
                }
                (Some(compile(location)?), Some(compile(channel)?))
            }
        };

        Ok(Self {
            network: network.to_string(),
            station,
            location,
            channel,
        })
    }
}

impl fmt::Display for StreamSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.network, self.station.as_str())?;
        if let (Some(location), Some(channel)) = (&self.location, &self.channel) {
            write!(f, ":{}.{}", location.as_str(), channel.as_str())?;
        }
        Ok(())
    }
}

fn is_pattern_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '?' || c == '*'
}

/// Subscribes to a streaming server and receives traces as JSON lines.
///
/// On connect the client sends one `SELECT <selector>` line per stream and a
/// closing `END`; the server then pushes one serialized trace per line.
pub struct NetworkCapture {
    host: String,
    port: u16,
    selectors: Vec<StreamSelector>,
    timeout: Duration,
    reader: Option<BufReader<TcpStream>>,
    line: String,
}

impl NetworkCapture {
    pub fn new<S: AsRef<str>>(
        host: impl Into<String>,
        port: u16,
        selectors: &[S],
        timeout: Duration,
    ) -> AcqResult<Self> {
        let host = host.into();
        if host.is_empty() {
            return Err(AcqError::Configuration("stream host is empty".into()));
        }
        if selectors.is_empty() {
            return Err(AcqError::Configuration("no stream selected".into()));
        }
        if timeout.is_zero() {
            return Err(AcqError::Configuration("stream timeout must be positive".into()));
        }
        let selectors = selectors
            .iter()
            .map(|s| s.as_ref().parse())
            .collect::<AcqResult<Vec<StreamSelector>>>()?;

        Ok(Self {
            host,
            port,
            selectors,
            timeout,
            reader: None,
            line: String::new(),
        })
    }

    fn wanted(&self, trace: &Trace) -> bool {
        self.selectors.iter().any(|selector| selector.matches(trace))
    }
}

impl Capture for NetworkCapture {
    fn acquisition_start(&mut self) -> AcqResult<()> {
        let address = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                AcqError::Connectivity(format!("cannot resolve {}:{}", self.host, self.port))
            })?;
        let mut stream = TcpStream::connect_timeout(&address, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;

        let mut request = String::new();
        for selector in &self.selectors {
            request.push_str(&format!("SELECT {}\n", selector));
        }
        request.push_str("END\n");
        stream.write_all(request.as_bytes())?;

        self.reader = Some(BufReader::new(stream));
        self.line.clear();
        Ok(())
    }

    fn capture_step(&mut self) -> AcqResult<Vec<Trace>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| AcqError::Connectivity("stream not connected".into()))?;

        // A timed out read may leave a partial line behind; keep it.
        match reader.read_line(&mut self.line) {
            Ok(0) => return Err(AcqError::Connectivity("stream closed by peer".into())),
            Ok(_) => {}
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                return Ok(Vec::new())
            }
            Err(err) => return Err(err.into()),
        }
        if !self.line.ends_with('\n') {
            return Ok(Vec::new());
        }

        let line = std::mem::take(&mut self.line);
        let line = line.trim();
        if line.is_empty() {
            return Ok(Vec::new());
        }
        let trace: Trace = serde_json::from_str(line)
            .map_err(|err| AcqError::Protocol(format!("malformed trace record: {}", err)))?;

        if self.wanted(&trace) {
            Ok(vec![trace])
        } else {
            Ok(Vec::new())
        }
    }

    fn acquisition_stop(&mut self) {
        self.reader = None;
        self.line.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn selector_parses_station_and_stream_forms() {
        let short: StreamSelector = "GE_APE".parse().unwrap();
        assert_eq!(short.location, None);
        let full: StreamSelector = "GE_APE:00.BH?".parse().unwrap();
        assert_eq!(full.location.as_ref().map(Pattern::as_str), Some("00"));
        assert_eq!(full.to_string(), "GE_APE:00.BH?");

        let empty_loc: StreamSelector = "GE_APE:.HHZ".parse().unwrap();
        assert_eq!(empty_loc.location.as_ref().map(Pattern::as_str), Some(""));
    }

    #[test]
    fn unresolvable_selectors_are_configuration_errors() {
        for bad in ["GEAPE", "_APE", "GE_", "GE_APE:00", "GE_AP-E", "GE_APE:00."] {
            assert!(
                matches!(bad.parse::<StreamSelector>(), Err(AcqError::Configuration(_))),
                "{bad} should be rejected"
            );
        }
        let none: [&str; 0] = [];
        assert!(NetworkCapture::new("localhost", 18000, &none, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn zero_timeout_is_rejected_at_construction() {
        let result = NetworkCapture::new("localhost", 18000, &["GE_APE"], Duration::ZERO);
        assert!(matches!(result, Err(AcqError::Configuration(_))));
    }

    #[test]
    fn many_wildcards_match_long_codes_quickly() {
        let selector: StreamSelector = "GE_*A*A*A*A*A*A*A*A*B".parse().unwrap();
        let station = "A".repeat(40);
        let trace = Trace::new("GE", &station, "", "BHZ", 0.0, 1.0, vec![]);
        let begun = std::time::Instant::now();
        assert!(!selector.matches(&trace));
        assert!(begun.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn selector_wildcards_match_channels() {
        let selector: StreamSelector = "GE_A*:.BH?".parse().unwrap();
        let hit = Trace::new("GE", "APE", "", "BHZ", 0.0, 1.0, vec![]);
        let miss = Trace::new("GE", "APE", "", "HHZ", 0.0, 1.0, vec![]);
        let other_net = Trace::new("GR", "APE", "", "BHZ", 0.0, 1.0, vec![]);
        assert!(selector.matches(&hit));
        assert!(!selector.matches(&miss));
        assert!(!selector.matches(&other_net));
    }

    #[test]
    fn receives_selected_traces_from_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request = Vec::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let line = line.trim().to_string();
                if line == "END" {
                    break;
                }
                request.push(line);
            }
            let mut stream = stream;
            let wanted = Trace::new("GE", "APE", "", "BHZ", 1.0, 0.5, vec![1, 2]);
            let unwanted = Trace::new("GE", "APE", "", "LHZ", 1.0, 0.5, vec![3]);
            for trace in [&unwanted, &wanted] {
                let mut line = serde_json::to_string(trace).unwrap();
                line.push('\n');
                stream.write_all(line.as_bytes()).unwrap();
            }
            request
        });

        let mut capture =
            NetworkCapture::new("127.0.0.1", port, &["GE_APE:.BH?"], Duration::from_secs(2))
                .unwrap();
        capture.acquisition_start().unwrap();

        let mut received = Vec::new();
        while received.is_empty() {
            received.extend(capture.capture_step().unwrap());
        }
        capture.acquisition_stop();

        assert_eq!(received[0].channel, "BHZ");
        assert_eq!(server.join().unwrap(), vec!["SELECT GE_APE:.BH?".to_string()]);
    }
}
