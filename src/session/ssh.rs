use async_ssh2_tokio::Config;
use async_ssh2_tokio::client::{AuthMethod, Client};
use log::{debug, trace};
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Pty};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;

use super::{Connector, SessionSettings, ShellStream};
use crate::device::{Credential, Device};
use crate::error::GatherError;

/// Opens password-authenticated interactive shells over SSH.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    settings: SessionSettings,
}

impl SshConnector {
    pub fn new(settings: SessionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }
}

/// An interactive shell whose channel is pumped by a background I/O task.
pub struct SshShell {
    /// Keeps the SSH connection open for as long as the shell is in use.
    _client: Client,
    sender: Sender<ShellInput>,
    recv: Receiver<Vec<u8>>,
    /// Bytes received but not yet handed out by `read_chunk`.
    pending: Vec<u8>,
    pump: Option<JoinHandle<()>>,
}

/// What the shell handle asks of the I/O task.
enum ShellInput {
    Data(Vec<u8>),
    /// Send EOF, close the channel and stop.
    Close,
}

impl Connector for SshConnector {
    type Stream = SshShell;

    async fn open_shell(
        &self,
        device: &Device,
        credential: &Credential,
    ) -> Result<SshShell, GatherError> {
        let settings = &self.settings;
        let device_addr = format!(
            "{}@{}:{}",
            credential.username(),
            device.address,
            settings.port
        );

        // Connect, authenticate and shell negotiation share one deadline.
        let (client, channel) = tokio::time::timeout(
            settings.connect_timeout,
            negotiate(settings, device, credential, &device_addr),
        )
        .await
        .map_err(|_| GatherError::ConnectTimeout(settings.connect_timeout))??;

        let (sender_to_shell, receiver_from_user) = mpsc::channel::<ShellInput>(16);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<Vec<u8>>(256);
        let pump = tokio::spawn(pump_channel(
            channel,
            receiver_from_user,
            sender_to_user,
            device_addr,
        ));

        Ok(SshShell {
            _client: client,
            sender: sender_to_shell,
            recv: receiver_from_shell,
            pending: Vec::new(),
            pump: Some(pump),
        })
    }
}

async fn negotiate(
    settings: &SessionSettings,
    device: &Device,
    credential: &Credential,
    device_addr: &str,
) -> Result<(Client, Channel<Msg>), GatherError> {
    let config = Config {
        preferred: settings.security.preferred(),
        inactivity_timeout: settings.response_timeout,
        ..Default::default()
    };

    let client = Client::connect_with_config(
        (device.address.clone(), settings.port),
        credential.username(),
        AuthMethod::with_password(credential.secret()),
        settings.security.server_check(),
        config,
    )
    .await?;
    debug!("{} TCP connection successful", device_addr);

    let mut channel = client.get_channel().await?;
    let pty = &settings.pty;
    channel
        .request_pty(
            true,
            &pty.term,
            pty.columns,
            pty.rows,
            0,
            0,
            &[
                (Pty::ECHO, 0),
                (Pty::TTY_OP_ISPEED, pty.speed),
                (Pty::TTY_OP_OSPEED, pty.speed),
            ],
        )
        .await?;
    wait_for_reply(&mut channel, "pseudo terminal").await?;
    channel.request_shell(true).await?;
    wait_for_reply(&mut channel, "shell").await?;
    debug!("{} Shell request successful", device_addr);

    Ok((client, channel))
}

/// Waits for the server's answer to a request sent with `want_reply`.
async fn wait_for_reply(
    channel: &mut Channel<Msg>,
    request: &'static str,
) -> Result<(), GatherError> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => return Err(GatherError::SessionSetup(request)),
            Some(msg) => trace!("ignoring {:?} while waiting for {} reply", msg, request),
            None => return Err(GatherError::ChannelDisconnectError),
        }
    }
}

/// Moves input from the shell handle to the channel and output back, until
/// either side goes away. The channel is closed on the way out.
async fn pump_channel(
    mut channel: Channel<Msg>,
    mut receiver_from_user: Receiver<ShellInput>,
    sender_to_user: Sender<Vec<u8>>,
    device_addr: String,
) {
    loop {
        tokio::select! {
            input = receiver_from_user.recv() => match input {
                Some(ShellInput::Data(data)) => {
                    if let Err(e) = channel.data(data.as_slice()).await {
                        debug!("{} Failed to send data to shell: {:?}", device_addr, e);
                        break;
                    }
                }
                Some(ShellInput::Close) | None => {
                    debug!("{} Shell handle closed, sending EOF.", device_addr);
                    let _ = channel.eof().await;
                    break;
                }
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { ref data }) | Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                    if sender_to_user.send(data.to_vec()).await.is_err() {
                        debug!("{} Shell output receiver dropped. Closing task.", device_addr);
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!("{} Shell exited with status code: {}", device_addr, exit_status);
                    let _ = channel.eof().await;
                    break;
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    debug!("{} Shell sent EOF.", device_addr);
                    break;
                }
                Some(_) => {}
            },
        }
    }
    if let Err(e) = channel.close().await {
        trace!("{} channel already closed: {:?}", device_addr, e);
    }
    debug!("{} SSH I/O task ended.", device_addr);
}

impl ShellStream for SshShell {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), GatherError> {
        self.sender
            .send(ShellInput::Data(data.to_vec()))
            .await
            .map_err(|_| GatherError::ChannelDisconnectError)
    }

    async fn read_chunk(&mut self, limit: usize) -> Result<Option<Vec<u8>>, GatherError> {
        if self.pending.is_empty() {
            match self.recv.recv().await {
                Some(data) => self.pending = data,
                None => return Ok(None),
            }
        }
        while self.pending.len() < limit {
            match self.recv.try_recv() {
                Ok(data) => self.pending.extend_from_slice(&data),
                Err(_) => break,
            }
        }
        let take = self.pending.len().min(limit);
        let rest = self.pending.split_off(take);
        Ok(Some(std::mem::replace(&mut self.pending, rest)))
    }

    async fn close(&mut self) {
        let Some(pump) = self.pump.take() else {
            return;
        };
        debug!("Closing SSH shell...");

        // Stop receiving new data, then log out and tear the channel down.
        self.recv.close();
        self.pending.clear();
        if self.sender.send(ShellInput::Data(b"exit\n".to_vec())).await.is_err()
            || self.sender.send(ShellInput::Close).await.is_err()
        {
            trace!("SSH I/O task already gone");
        }
        if let Err(e) = pump.await {
            debug!("SSH I/O task failed: {:?}", e);
        }
    }
}

impl std::fmt::Debug for SshShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshShell")
            .field("pending", &self.pending.len())
            .field("open", &self.pump.is_some())
            .finish_non_exhaustive()
    }
}

