use std::borrow::Cow;

use log::{debug, trace, warn};

use super::{CommandBatch, Connector, SessionOutcome, SessionSettings, ShellStream, Transcript};
use crate::device::{Credential, Device};
use crate::error::GatherError;

/// Writes the whole batch to the shell in one burst, without waiting for any
/// command to finish.
pub async fn dispatch<S: ShellStream>(
    stream: &mut S,
    commands: &CommandBatch,
) -> Result<(), GatherError> {
    stream.write_all(&commands.payload()).await
}

/// Reads shell output until the device prompt reappears.
///
/// Every read is preceded by `settings.read_delay`. Complete lines are
/// appended as they arrive; a line split across reads is joined first. The
/// unterminated tail of the latest read is the prompt candidate, and once it
/// matches the loop stops without reading again.
pub async fn accumulate<S: ShellStream>(
    stream: &mut S,
    device: &Device,
    settings: &SessionSettings,
) -> Result<Transcript, GatherError> {
    let mut transcript = Transcript::default();
    let mut partial: Vec<u8> = Vec::new();

    loop {
        tokio::time::sleep(settings.read_delay).await;
        let Some(chunk) = stream.read_chunk(settings.read_buffer_size).await? else {
            debug!("{} shell closed before prompt", device.address);
            return Err(GatherError::ChannelDisconnectError);
        };
        trace!("{} read {} bytes", device.address, chunk.len());
        partial.extend_from_slice(&chunk);

        while let Some(newline_pos) = partial.iter().position(|b| *b == b'\n') {
            let line = partial.drain(..=newline_pos).collect::<Vec<u8>>();
            transcript.push_line(decode_line(&line[..newline_pos]));
        }

        let tail = String::from_utf8_lossy(&partial);
        if device.is_prompt(&tail) {
            debug!("{} prompt {} detected", device.address, device.expected_prompt());
            transcript.push_line(tail.into_owned());
            return Ok(transcript);
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let line = String::from_utf8_lossy(bytes);
    match line {
        Cow::Borrowed(s) => s.strip_suffix('\r').unwrap_or(s).to_string(),
        Cow::Owned(mut s) => {
            if s.ends_with('\r') {
                s.pop();
            }
            s
        }
    }
}

/// Dispatches the batch and accumulates output, bounded by the response
/// timeout when one is set.
pub async fn collect_transcript<S: ShellStream>(
    stream: &mut S,
    device: &Device,
    commands: &CommandBatch,
    settings: &SessionSettings,
) -> Result<Transcript, GatherError> {
    dispatch(stream, commands).await?;
    debug!(
        "{} dispatched {} commands",
        device.address,
        commands.commands().len()
    );

    match settings.response_timeout {
        Some(timeout) => tokio::time::timeout(timeout, accumulate(stream, device, settings))
            .await
            .map_err(|_| GatherError::PromptTimeout {
                prompt: device.expected_prompt(),
                timeout,
            })?,
        None => accumulate(stream, device, settings).await,
    }
}

/// Runs one device end to end. Every failure, from connect to the last read,
/// becomes a [`SessionOutcome::Failed`] for this device only. A shell that was
/// opened is closed again whether or not the prompt came back.
pub async fn run_device<C: Connector>(
    connector: &C,
    device: &Device,
    credential: &Credential,
    commands: &CommandBatch,
    settings: &SessionSettings,
) -> SessionOutcome {
    let result = match connector.open_shell(device, credential).await {
        Ok(mut stream) => {
            let collected = collect_transcript(&mut stream, device, commands, settings).await;
            stream.close().await;
            trace!("{} shell closed", device.address);
            collected
        }
        Err(error) => Err(error),
    };

    match result {
        Ok(transcript) => {
            debug!("{} collected {} lines", device.address, transcript.len());
            SessionOutcome::Completed {
                address: device.address.clone(),
                transcript,
            }
        }
        Err(error) => {
            warn!("{} failed: {}", device.address, error);
            SessionOutcome::Failed {
                address: device.address.clone(),
                error,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{accumulate, collect_transcript, run_device};
    use crate::device::{Credential, Device};
    use crate::error::GatherError;
    use crate::session::replay::{ReplayConnector, ReplayScript, ReplayShell};
    use crate::session::{CommandBatch, Connector, SessionOutcome, SessionSettings, ShellStream};
    use std::time::Duration;

    fn device() -> Device {
        Device::new("10.0.0.1", "router1")
    }

    fn credential() -> Credential {
        Credential::new("admin", "secret").expect("credential")
    }

    async fn shell(script: ReplayScript) -> ReplayShell {
        ReplayConnector::new()
            .with_device("10.0.0.1", script)
            .open_shell(&device(), &credential())
            .await
            .expect("scripted shell")
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_first_read_ending_with_prompt() {
        let mut stream = shell(ReplayScript::chunks([
            "router1#show version\r\nCisco IOS XE\r\nrouter1#",
            "never read\r\n",
        ]))
        .await;

        let transcript = accumulate(&mut stream, &device(), &SessionSettings::default())
            .await
            .expect("prompt detected");

        assert_eq!(
            transcript.lines(),
            ["router1#show version", "Cisco IOS XE", "router1#"]
        );
        assert_eq!(stream.reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_reading_until_prompt_reappears() {
        let mut stream = shell(ReplayScript::chunks([
            "router1#show arp\r\n",
            "Protocol  Address\r\nInternet  10.0.0.254\r\n",
            "router1#",
        ]))
        .await;

        let transcript = accumulate(&mut stream, &device(), &SessionSettings::default())
            .await
            .expect("prompt detected");

        assert_eq!(transcript.last_line(), Some("router1#"));
        assert_eq!(transcript.len(), 4);
        assert_eq!(stream.reads(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn joins_lines_split_across_reads() {
        let mut stream = shell(ReplayScript::chunks([
            "Gigabit",
            "Ethernet0/0 up\r\nrout",
            "er1#",
        ]))
        .await;

        let transcript = accumulate(&mut stream, &device(), &SessionSettings::default())
            .await
            .expect("prompt detected");

        assert_eq!(transcript.lines(), ["GigabitEthernet0/0 up", "router1#"]);
    }

    #[tokio::test(start_paused = true)]
    async fn intermediate_prompts_of_other_modes_do_not_stop_loop() {
        let mut stream = shell(ReplayScript::chunks([
            "router1>",
            "\r\nrouter1(config)#",
            "\r\nrouter1#",
        ]))
        .await;

        let transcript = accumulate(&mut stream, &device(), &SessionSettings::default())
            .await
            .expect("prompt detected");

        assert_eq!(stream.reads(), 3);
        assert_eq!(transcript.lines(), ["router1>", "router1(config)#", "router1#"]);
    }

    #[tokio::test(start_paused = true)]
    async fn read_buffer_size_bounds_each_read() {
        let settings = SessionSettings {
            read_buffer_size: 4,
            ..SessionSettings::default()
        };
        let mut stream = shell(ReplayScript::chunks(["ab\r\nrouter1#"])).await;

        let transcript = accumulate(&mut stream, &device(), &settings)
            .await
            .expect("prompt detected");

        assert_eq!(transcript.lines(), ["ab", "router1#"]);
        assert_eq!(stream.reads(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_shell_before_prompt_is_disconnect() {
        let mut stream = shell(ReplayScript::chunks(["router1#show version\r\n"])).await;

        let err = accumulate(&mut stream, &device(), &SessionSettings::default())
            .await
            .expect_err("shell closed");

        assert!(matches!(err, GatherError::ChannelDisconnectError));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_shell_times_out() {
        let settings = SessionSettings {
            response_timeout: Some(Duration::from_secs(5)),
            ..SessionSettings::default()
        };
        let mut stream = shell(ReplayScript::stalled(["router1#show version\r\n"])).await;

        let err = collect_transcript(&mut stream, &device(), &CommandBatch::default(), &settings)
            .await
            .expect_err("prompt never returns");

        match err {
            GatherError::PromptTimeout { prompt, timeout } => {
                assert_eq!(prompt, "router1#");
                assert_eq!(timeout, Duration::from_secs(5));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batch_is_written_once_before_reading() {
        let commands = CommandBatch::new(["terminal length 0", "show version"]);
        let mut stream = shell(ReplayScript::chunks(["router1#"])).await;

        collect_transcript(&mut stream, &device(), &commands, &SessionSettings::default())
            .await
            .expect("transcript");

        assert_eq!(stream.writes(), vec![b"terminal length 0\nshow version\n".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_becomes_failed_outcome() {
        let connector =
            ReplayConnector::new().with_device("10.0.0.1", ReplayScript::refuse("auth rejected"));

        let outcome = run_device(
            &connector,
            &device(),
            &credential(),
            &CommandBatch::default(),
            &SessionSettings::default(),
        )
        .await;

        match outcome {
            SessionOutcome::Failed { address, error } => {
                assert_eq!(address, "10.0.0.1");
                assert!(matches!(error, GatherError::ConnectionRefused(_)));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn read_error_before_prompt_is_reported() {
        let mut stream = shell(ReplayScript::failing(
            ["router1#show version\r\n"],
            "connection reset by peer",
        ))
        .await;

        let err = accumulate(&mut stream, &device(), &SessionSettings::default())
            .await
            .expect_err("read fails");

        match err {
            GatherError::ShellRead(reason) => assert_eq!(reason, "connection reset by peer"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refused_shell_request_becomes_failed_outcome() {
        let connector =
            ReplayConnector::new().with_device("10.0.0.1", ReplayScript::RefuseSetup("shell"));

        let outcome = run_device(
            &connector,
            &device(),
            &credential(),
            &CommandBatch::default(),
            &SessionSettings::default(),
        )
        .await;

        match outcome {
            SessionOutcome::Failed { error, .. } => {
                assert!(matches!(error, GatherError::SessionSetup("shell")));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(connector.closed_shells(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shell_is_closed_after_transcript() {
        let connector = ReplayConnector::new().with_device("10.0.0.1", ReplayScript::echo("router1"));

        let outcome = run_device(
            &connector,
            &device(),
            &credential(),
            &CommandBatch::default(),
            &SessionSettings::default(),
        )
        .await;

        assert!(outcome.is_success());
        assert_eq!(connector.closed_shells(), 1);
        assert_eq!(connector.open_shells(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shell_is_closed_after_failed_read_and_timeout() {
        let settings = SessionSettings {
            response_timeout: Some(Duration::from_secs(5)),
            ..SessionSettings::default()
        };
        let connector = ReplayConnector::new()
            .with_device("10.0.0.1", ReplayScript::failing(Vec::<&str>::new(), "reset"))
            .with_device("10.0.0.2", ReplayScript::stalled(["router2#show arp\r\n"]));

        let broken = run_device(
            &connector,
            &device(),
            &credential(),
            &CommandBatch::default(),
            &settings,
        )
        .await;
        let stalled = run_device(
            &connector,
            &Device::new("10.0.0.2", "router2"),
            &credential(),
            &CommandBatch::default(),
            &settings,
        )
        .await;

        assert!(!broken.is_success());
        assert!(!stalled.is_success());
        assert_eq!(connector.closed_shells(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_shell_reads_as_ended() {
        let mut stream = shell(ReplayScript::stalled(["router1#show version\r\n"])).await;
        stream.close().await;
        stream.close().await;

        assert!(stream.is_closed());
        let err = accumulate(&mut stream, &device(), &SessionSettings::default())
            .await
            .expect_err("nothing to read");
        assert!(matches!(err, GatherError::ChannelDisconnectError));
    }
}
