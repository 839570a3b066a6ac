//! SCPI instruments over TCP.
//!
//! Line-oriented transport: every command is terminated with `\n`, every reply is one line.
//! Sources format their set command with `strfmt` (`{value}` placeholder); meters repeat their
//! query `averaging` times and return the mean of the parsed replies.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::hardware::capabilities::{ExcitationSource, MeasurementSource};

/// Trait for SCPI communication transports.
///
/// Abstracts the underlying connection so sources and meters can be tested without a socket.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Send a query command and return the response.
    async fn query(&self, command: &str) -> Result<String>;

    /// Send a command without expecting a response.
    async fn command(&self, command: &str) -> Result<()>;
}

/// SCPI transport over a raw TCP socket.
pub struct TcpScpiTransport {
    address: String,
    stream: Mutex<BufStream<TcpStream>>,
}

impl TcpScpiTransport {
    /// Connect to `host:port`.
    pub async fn connect(address: &str) -> Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .with_context(|| format!("Failed to connect to SCPI instrument at {}", address))?;
        debug!(address, "SCPI connection established");
        Ok(Self {
            address: address.to_string(),
            stream: Mutex::new(BufStream::new(stream)),
        })
    }

    async fn send(stream: &mut BufStream<TcpStream>, command: &str) -> Result<()> {
        stream.write_all(command.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ScpiTransport for TcpScpiTransport {
    async fn query(&self, command: &str) -> Result<String> {
        let mut stream = self.stream.lock().await;
        Self::send(&mut stream, command)
            .await
            .with_context(|| format!("SCPI query '{}' to {} failed", command, self.address))?;
        let mut line = String::new();
        let read = stream
            .read_line(&mut line)
            .await
            .with_context(|| format!("SCPI read from {} failed", self.address))?;
        if read == 0 {
            return Err(anyhow!("{} closed the connection", self.address));
        }
        trace!(command, response = line.trim_end(), "SCPI query");
        Ok(line)
    }

    async fn command(&self, command: &str) -> Result<()> {
        let mut stream = self.stream.lock().await;
        Self::send(&mut stream, command)
            .await
            .with_context(|| format!("SCPI command '{}' to {} failed", command, self.address))?;
        trace!(command, "SCPI command");
        Ok(())
    }
}

/// Parse a floating-point response from SCPI query.
pub fn parse_f64_response(response: &str) -> Result<f64> {
    response
        .trim()
        .parse::<f64>()
        .with_context(|| format!("Failed to parse SCPI response as f64: '{}'", response))
}

/// Render a set-command template such as `:SOUR:VOLT {value}`.
pub fn format_set_command(template: &str, value: f64) -> Result<String> {
    let mut vars = HashMap::new();
    vars.insert("value".to_string(), value.to_string());
    strfmt::strfmt(template, &vars)
        .map_err(|e| anyhow!("Invalid SCPI command template '{}': {}", template, e))
}

/// Send every init command in order.
pub async fn run_init(transport: &dyn ScpiTransport, init: &[String]) -> Result<()> {
    for command in init {
        transport.command(command).await?;
    }
    Ok(())
}

/// Programmable source driven by a templated set command.
pub struct ScpiSource<T: ScpiTransport> {
    transport: T,
    set_command: String,
}

impl<T: ScpiTransport> ScpiSource<T> {
    /// Wrap a transport. Fails if the template does not render.
    pub fn new(transport: T, set_command: impl Into<String>) -> Result<Self> {
        let set_command = set_command.into();
        format_set_command(&set_command, 0.0)?;
        Ok(Self {
            transport,
            set_command,
        })
    }
}

#[async_trait]
impl<T: ScpiTransport> ExcitationSource for ScpiSource<T> {
    async fn set_output(&self, value: f64) -> Result<()> {
        let command = format_set_command(&self.set_command, value)?;
        self.transport.command(&command).await
    }
}

/// Meter answering one reading per query.
pub struct ScpiMeter<T: ScpiTransport> {
    transport: T,
    query: String,
}

impl<T: ScpiTransport> ScpiMeter<T> {
    /// Wrap a transport.
    pub fn new(transport: T, query: impl Into<String>) -> Self {
        Self {
            transport,
            query: query.into(),
        }
    }
}

#[async_trait]
impl<T: ScpiTransport> MeasurementSource for ScpiMeter<T> {
    async fn measure_now(&self, averaging: u32) -> Result<f64> {
        let samples = averaging.max(1);
        let mut sum = 0.0;
        for _ in 0..samples {
            let response = self.transport.query(&self.query).await?;
            sum += parse_f64_response(&response)?;
        }
        Ok(sum / f64::from(samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Scripted transport replaying canned replies.
    struct ScriptedTransport {
        sent: Mutex<Vec<String>>,
        replies: Mutex<VecDeque<String>>,
    }

    impl ScriptedTransport {
        fn new(replies: &[&str]) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl ScpiTransport for ScriptedTransport {
        async fn query(&self, command: &str) -> Result<String> {
            self.sent.lock().await.push(command.to_string());
            self.replies
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| anyhow!("no reply scripted"))
        }

        async fn command(&self, command: &str) -> Result<()> {
            self.sent.lock().await.push(command.to_string());
            Ok(())
        }
    }

    #[test]
    fn parses_scientific_notation() {
        assert_eq!(parse_f64_response(" +1.25E-3\r\n").unwrap(), 1.25e-3);
        assert!(parse_f64_response("ERR").is_err());
    }

    #[test]
    fn formats_set_command() {
        assert_eq!(
            format_set_command(":SOUR:VOLT {value}", 0.5).unwrap(),
            ":SOUR:VOLT 0.5"
        );
        assert!(format_set_command(":SOUR:VOLT {level}", 0.5).is_err());
    }

    #[tokio::test]
    async fn source_sends_rendered_command() {
        let source = ScpiSource::new(ScriptedTransport::new(&[]), "VOLT {value}").unwrap();
        source.set_output(-1.5).await.unwrap();
        source.zero().await.unwrap();
        assert_eq!(*source.transport.sent.lock().await, vec!["VOLT -1.5", "VOLT 0"]);
    }

    #[tokio::test]
    async fn meter_averages_replies() {
        let meter = ScpiMeter::new(ScriptedTransport::new(&["1.0", "2.0", "3.0"]), ":READ?");
        assert_eq!(meter.measure_now(3).await.unwrap(), 2.0);
        assert_eq!(meter.transport.sent.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn tcp_transport_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b":READ?\n");
            socket.write_all(b"4.5\n").await.unwrap();
        });

        let transport = TcpScpiTransport::connect(&address).await.unwrap();
        let reply = transport.query(":READ?").await.unwrap();
        assert_eq!(parse_f64_response(&reply).unwrap(), 4.5);
        server.await.unwrap();
    }
}
