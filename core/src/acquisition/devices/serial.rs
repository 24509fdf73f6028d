use crate::prelude::{now_epoch, AcqError, AcqResult, Capture, Trace};
use log::trace;
use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use std::io::{ErrorKind, Read};
use std::time::Duration;

/// Connection and buffering parameters of a serial digitizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub device: String,
    pub baud_rate: u32,
    pub sample_rate: f64,
    /// Samples collected before a trace is emitted.
    pub block_len: usize,
    pub read_timeout_ms: u64,
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            baud_rate: 9600,
            sample_rate: 50.0,
            block_len: 50,
            read_timeout_ms: 200,
            network: String::new(),
            station: "SER".into(),
            location: String::new(),
            channel: "HHZ".into(),
        }
    }
}

/// Splits the raw byte stream into newline-terminated integer samples.
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes and returns the samples completed by them.
    /// Lines that are not integers are skipped.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<i32> {
        let mut samples = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&self.partial);
                let line = line.trim();
                if !line.is_empty() {
                    match line.parse::<i32>() {
                        Ok(value) => samples.push(value),
                        Err(_) => trace!("skipping unparsable serial line {:?}", line),
                    }
                }
                self.partial.clear();
            } else {
                self.partial.push(byte);
            }
        }
        samples
    }

    pub fn reset(&mut self) {
        self.partial.clear();
    }
}

/// Reads an ASCII sample stream from a serial device and cuts it into
/// fixed-length traces.
pub struct SerialCapture {
    config: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
    assembler: LineAssembler,
    pending: Vec<i32>,
    next_tmin: Option<f64>,
}

impl SerialCapture {
    pub fn new(config: SerialConfig) -> AcqResult<Self> {
        if config.device.is_empty() {
            return Err(AcqError::Configuration("serial device path is empty".into()));
        }
        if !(config.sample_rate.is_finite() && config.sample_rate > 0.0) {
            return Err(AcqError::Configuration(format!(
                "sample rate must be positive, got {}",
                config.sample_rate
            )));
        }
        if config.block_len == 0 {
            return Err(AcqError::Configuration("block length must be non-zero".into()));
        }
        Ok(Self {
            config,
            port: None,
            assembler: LineAssembler::new(),
            pending: Vec::new(),
            next_tmin: None,
        })
    }

    fn deltat(&self) -> f64 {
        1.0 / self.config.sample_rate
    }

    /// Emits a trace for every complete block in `pending`.
    ///
    /// The first block after connecting is stamped so that its last sample
    /// is "now"; later blocks follow contiguously.
    fn cut_blocks(&mut self) -> Vec<Trace> {
        let deltat = self.deltat();
        let block_len = self.config.block_len;
        let mut traces = Vec::new();
        while self.pending.len() >= block_len {
            let samples: Vec<i32> = self.pending.drain(..block_len).collect();
            let tmin = self
                .next_tmin
                .unwrap_or_else(|| now_epoch() - (block_len - 1) as f64 * deltat);
            self.next_tmin = Some(tmin + block_len as f64 * deltat);
            traces.push(Trace::new(
                self.config.network.clone(),
                self.config.station.clone(),
                self.config.location.clone(),
                self.config.channel.clone(),
                tmin,
                deltat,
                samples,
            ));
        }
        traces
    }
}

impl Capture for SerialCapture {
    fn acquisition_start(&mut self) -> AcqResult<()> {
        let port = serialport::new(&self.config.device, self.config.baud_rate)
            .timeout(Duration::from_millis(self.config.read_timeout_ms))
            .open()?;
        self.port = Some(port);
        self.assembler.reset();
        self.pending.clear();
        self.next_tmin = None;
        Ok(())
    }

    fn capture_step(&mut self) -> AcqResult<Vec<Trace>> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| AcqError::Connectivity("serial port not open".into()))?;

        let mut buffer = [0u8; 1024];
        let n = match port.read(&mut buffer) {
            Ok(n) => n,
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                return Ok(Vec::new())
            }
            Err(err) => return Err(err.into()),
        };
        let samples = self.assembler.feed(&buffer[..n]);
        self.pending.extend(samples);
        Ok(self.cut_blocks())
    }

    fn acquisition_stop(&mut self) {
        self.port = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_joins_lines_split_across_reads() {
        let mut assembler = LineAssembler::new();
        assert_eq!(assembler.feed(b"12\n-3"), vec![12]);
        assert_eq!(assembler.feed(b"4\r\nnoise\n\n7\n"), vec![-34, 7]);
    }

    #[test]
    fn blocks_are_cut_at_block_length_and_stay_contiguous() {
        let mut capture = SerialCapture::new(SerialConfig {
            device: "/dev/null".into(),
            sample_rate: 10.0,
            block_len: 3,
            ..Default::default()
        })
        .unwrap();

        capture.pending.extend([1, 2, 3, 4, 5, 6, 7]);
        let traces = capture.cut_blocks();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].samples, vec![1, 2, 3]);
        assert_eq!(traces[1].samples, vec![4, 5, 6]);
        assert!((traces[1].tmin - traces[0].tmin - 0.3).abs() < 1e-9);
        assert_eq!(capture.pending, vec![7]);
    }

    #[test]
    fn empty_device_path_is_a_configuration_error() {
        assert!(matches!(
            SerialCapture::new(SerialConfig::default()),
            Err(AcqError::Configuration(_))
        ));
    }
}
