//! rigctld client
//!
//! Keeps a transceiver and the receiver on the same frequency and mode. Speaks
//! the Hamlib `rigctld` line protocol over a plain TCP socket: one command per
//! line, replies terminated by `RPRT <code>` (or a fixed number of data lines
//! for `m`).

use crate::tuning::Mode;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Rig control errors
#[derive(Error, Debug)]
pub enum RigError {
    #[error("Rig I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Rig did not answer within {0:?}")]
    Timeout(Duration),
    #[error("Unexpected rig response to '{command}': {response:?}")]
    Parse { command: String, response: String },
}

/// Frequency and mode reported by the rig
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigReading {
    pub freq_hz: u64,
    pub mode: Mode,
}

impl RigReading {
    pub fn freq_khz(&self) -> f64 {
        self.freq_hz as f64 / 1000.0
    }
}

/// Something the session wants the rig to do
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RigRequest {
    SetFrequency { hz: u64 },
    SetMode(Mode),
}

/// Filter width requested together with a mode change (Hz)
pub fn mode_width(mode: Mode) -> u32 {
    match mode {
        Mode::Usb | Mode::Lsb => 2400,
        Mode::Cw => 500,
        Mode::Am => 6000,
    }
}

/// Convert kHz to the whole-Hz value the rig works in
pub fn khz_to_hz(khz: f64) -> u64 {
    (khz * 1000.0).round().max(0.0) as u64
}

pub struct RigClient {
    stream: BufReader<TcpStream>,
    addr: String,
    timeout: Duration,
}

impl RigClient {
    pub async fn connect(host: &str, port: u16, io_timeout: Duration) -> Result<Self, RigError> {
        let addr = format!("{}:{}", host, port);
        let tcp = timeout(io_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| RigError::Timeout(io_timeout))??;
        tcp.set_nodelay(true)?;

        Ok(Self {
            stream: BufReader::new(tcp),
            addr,
            timeout: io_timeout,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Current frequency and mode
    pub async fn read_state(&mut self) -> Result<RigReading, RigError> {
        let freq_hz = self.get_frequency().await?;
        let (mode, _passband) = self.get_mode().await?;
        Ok(RigReading { freq_hz, mode })
    }

    pub async fn get_frequency(&mut self) -> Result<u64, RigError> {
        let lines = self.transact("+f", 0).await?;
        parse_frequency(&lines).ok_or_else(|| RigError::Parse {
            command: "+f".to_string(),
            response: lines.join("\\n"),
        })
    }

    pub async fn get_mode(&mut self) -> Result<(Mode, i32), RigError> {
        let lines = self.transact("m", 2).await?;
        parse_mode(&lines).ok_or_else(|| RigError::Parse {
            command: "m".to_string(),
            response: lines.join("\\n"),
        })
    }

    pub async fn set_frequency(&mut self, hz: u64) -> Result<(), RigError> {
        self.transact(&format!("F {}", hz), 0).await.map(|_| ())
    }

    pub async fn set_mode(&mut self, mode: Mode) -> Result<(), RigError> {
        let command = format!("+M {} {}", mode.as_str(), mode_width(mode));
        self.transact(&command, 0).await.map(|_| ())
    }

    pub async fn apply(&mut self, request: RigRequest) -> Result<(), RigError> {
        match request {
            RigRequest::SetFrequency { hz } => self.set_frequency(hz).await,
            RigRequest::SetMode(mode) => self.set_mode(mode).await,
        }
    }

    /// Send one command and collect its reply lines
    ///
    /// Stops at an `RPRT` line, or after `data_lines` lines when non-zero.
    /// A non-zero `RPRT` code is reported as a parse error.
    async fn transact(&mut self, command: &str, data_lines: usize) -> Result<Vec<String>, RigError> {
        let io_timeout = self.timeout;
        let exchange = async {
            debug!(rig = %self.addr, "-> {}", command);
            let stream = self.stream.get_mut();
            stream.write_all(format!("{}\n", command).as_bytes()).await?;
            stream.flush().await?;

            let mut lines = Vec::new();
            loop {
                let mut line = String::new();
                if self.stream.read_line(&mut line).await? == 0 {
                    return Err(RigError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "rigctld closed the connection",
                    )));
                }
                let line = line.trim_end().to_string();
                if let Some(code) = line.strip_prefix("RPRT") {
                    if code.trim() != "0" {
                        return Err(RigError::Parse {
                            command: command.to_string(),
                            response: line,
                        });
                    }
                    break;
                }
                lines.push(line);
                if data_lines > 0 && lines.len() == data_lines {
                    break;
                }
            }
            Ok::<_, RigError>(lines)
        };

        timeout(io_timeout, exchange)
            .await
            .map_err(|_| RigError::Timeout(io_timeout))?
    }
}

/// Extract Hz from an extended `+f` reply (`Frequency: 14060000`)
pub fn parse_frequency(lines: &[String]) -> Option<u64> {
    lines.iter().find_map(|line| {
        let value = line.trim().strip_prefix("Frequency:")?;
        let hz: f64 = value.trim().parse().ok()?;
        (hz >= 0.0).then(|| hz.round() as u64)
    })
}

/// Parse an `m` reply: mode line then passband line
pub fn parse_mode(lines: &[String]) -> Option<(Mode, i32)> {
    let mode = lines.first()?.parse().ok()?;
    let passband = lines.get(1)?.trim().parse().ok()?;
    Some((mode, passband))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_parse_frequency() {
        assert_eq!(
            parse_frequency(&lines("get_freq:\nFrequency: 14060000")),
            Some(14_060_000)
        );
        assert_eq!(parse_frequency(&lines("Frequency: 7100000.000000")), Some(7_100_000));
        assert_eq!(parse_frequency(&lines("get_freq:")), None);
        assert_eq!(parse_frequency(&lines("Frequency: abc")), None);
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode(&lines("CW\n500")), Some((Mode::Cw, 500)));
        assert_eq!(parse_mode(&lines("LSB\n2400")), Some((Mode::Lsb, 2400)));
        assert_eq!(parse_mode(&lines("PKTUSB\n2400")), None);
        assert_eq!(parse_mode(&lines("USB")), None);
    }

    #[test]
    fn test_mode_widths() {
        assert_eq!(mode_width(Mode::Usb), 2400);
        assert_eq!(mode_width(Mode::Lsb), 2400);
        assert_eq!(mode_width(Mode::Cw), 500);
        assert_eq!(mode_width(Mode::Am), 6000);
    }

    #[test]
    fn test_khz_to_hz() {
        assert_eq!(khz_to_hz(14060.1), 14_060_100);
        assert_eq!(khz_to_hz(7100.0), 7_100_000);
    }

    /// Minimal rigctld: answers each command from a fixed table
    async fn fake_rigctld() -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut read = BufReader::new(read);
            let mut received = Vec::new();
            loop {
                let mut line = String::new();
                if read.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let command = line.trim_end().to_string();
                let reply = match command.as_str() {
                    "+f" => "get_freq:\nFrequency: 7100000\nRPRT 0\n".to_string(),
                    "m" => "LSB\n2400\n".to_string(),
                    c if c.starts_with("F ") => "RPRT 0\n".to_string(),
                    c if c.starts_with("+M ") => format!("set_mode: {}\nRPRT 0\n", &c[3..]),
                    _ => "RPRT -1\n".to_string(),
                };
                received.push(command);
                write.write_all(reply.as_bytes()).await.unwrap();
            }
            received
        });
        (port, handle)
    }

    #[tokio::test]
    async fn test_client_round_trip() {
        let (port, server) = fake_rigctld().await;
        let mut rig = RigClient::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();

        let reading = rig.read_state().await.unwrap();
        assert_eq!(reading, RigReading { freq_hz: 7_100_000, mode: Mode::Lsb });
        assert_eq!(reading.freq_khz(), 7100.0);

        rig.apply(RigRequest::SetFrequency { hz: 14_060_000 }).await.unwrap();
        rig.apply(RigRequest::SetMode(Mode::Cw)).await.unwrap();
        assert!(matches!(
            rig.transact("bogus", 0).await,
            Err(RigError::Parse { .. })
        ));

        drop(rig);
        let received = server.await.unwrap();
        assert_eq!(received, vec!["+f", "m", "F 14060000", "+M CW 500", "bogus"]);
    }

    #[tokio::test]
    async fn test_silent_rig_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let mut rig = RigClient::connect("127.0.0.1", port, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(matches!(rig.get_frequency().await, Err(RigError::Timeout(_))));
    }
}
