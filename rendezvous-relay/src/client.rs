use std::net::SocketAddr;

use anyhow::{Context, Result, bail};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{debug, info, warn};

use crate::{
    cli::ClientArgs,
    protocol::{RoutedMessage, encode_directive, write_line},
};

/// A peer connected to the relay under one identity.
pub struct RelayClient {
    identity: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: Vec<u8>,
}

impl RelayClient {
    /// Connects and announces `identity` as the first line.
    pub async fn connect(addr: SocketAddr, identity: &str) -> Result<Self> {
        if identity.trim().is_empty() || identity.contains(char::is_whitespace) {
            bail!("identity must be a non-empty token without whitespace");
        }

        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        let (reader, mut writer) = stream.into_split();

        write_line(&mut writer, format!("{identity}\n").as_bytes())
            .await
            .context("failed to send identity")?;
        info!(%addr, identity, "connected to relay");

        Ok(Self {
            identity: identity.to_string(),
            reader: BufReader::new(reader),
            writer,
            line: Vec::new(),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Asks the relay to forward `payload` to `destination`.
    ///
    /// Delivery is not acknowledged; unknown destinations are dropped silently.
    pub async fn send(&mut self, destination: &str, payload: &str) -> Result<()> {
        if destination.is_empty() || destination.contains(char::is_whitespace) {
            bail!("destination '{destination}' must be a non-empty token without whitespace");
        }
        if payload.contains('\n') {
            bail!("payload must fit on a single line");
        }

        write_line(&mut self.writer, &encode_directive(destination, payload))
            .await
            .with_context(|| format!("failed to send message for {destination}"))
    }

    /// Waits for the next forwarded message. `None` once the relay hangs up.
    ///
    /// Cancel safe: a partially received line is kept and completed by the
    /// next call.
    pub async fn recv(&mut self) -> Result<Option<RoutedMessage>> {
        loop {
            self.reader.read_until(b'\n', &mut self.line).await?;
            if !self.line.ends_with(b"\n") {
                return Ok(None);
            }

            let message = RoutedMessage::parse(&self.line);
            if message.is_none() {
                debug!(
                    line = %String::from_utf8_lossy(&self.line).trim_end(),
                    "skipping unexpected line from relay"
                );
            }
            self.line.clear();

            if message.is_some() {
                return Ok(message);
            }
        }
    }

    /// Half-closes the connection; the relay then drops our registration.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await.context("failed to shut down connection")
    }
}

/// Interactive loop behind the `relay-client` binary.
pub async fn run(args: ClientArgs) -> Result<()> {
    let mut client = RelayClient::connect(args.server, &args.identity).await?;
    write_stdout(&format!("*** connected as {}", client.identity())).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            message = client.recv() => {
                match message? {
                    Some(message) => {
                        write_stdout(&format!("<{}> {}", message.sender, message.payload)).await?;
                    }
                    None => {
                        write_stdout("*** relay closed the connection").await?;
                        break;
                    }
                }
            }
            bytes_read = stdin.read_line(&mut input) => {
                if !handle_stdin_input(bytes_read, &input, &mut client).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    if let Err(error) = client.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
    Ok(())
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    client: &mut RelayClient,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    let text = input.trim_end_matches(['\r', '\n']);
    if text.trim().is_empty() {
        return Ok(true);
    }

    if text.trim().eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving").await?;
        return Ok(false);
    }

    let Some((destination, payload)) = text.trim_start().split_once(' ') else {
        write_stderr("!!! expected: DESTINATION MESSAGE").await?;
        return Ok(true);
    };

    if let Err(err) = client.send(destination, payload).await {
        write_stderr(&format!("!!! {err:#}")).await?;
    }
    Ok(true)
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
