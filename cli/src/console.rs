//! The host's interactive command loop.
//!
//! Closed input does not end the loop: the host keeps supervising until it is interrupted or
//! told to quit, so it can run detached from a terminal.

use std::future::Future;
use std::io;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use ninebox_client::BackendClient;
use ninebox_client::ConnectionStatusConsumer;
use ninebox_client::status_indicator::render_status_line;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::Lines;
use tracing::info;
use tracing::warn;

use crate::path_utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    Quit,
    Interrupted,
    SupervisorGone,
}

fn print_commands(out: &mut impl Write) -> io::Result<()> {
    writeln!(
        out,
        "commands: [r] retry  [p] ping  [s] status  [l] log file  [q] quit"
    )
}

/// Reads commands from `input` until `q`, `interrupt` resolves, or the supervisor is gone.
/// `interrupt` is polled for the whole session, including while a ping is in flight.
pub async fn run<R, W, S>(
    input: R,
    out: &mut W,
    consumer: &ConnectionStatusConsumer,
    client: &BackendClient,
    log_path: Option<&Path>,
    interrupt: S,
) -> anyhow::Result<ConsoleExit>
where
    R: AsyncBufRead + Unpin,
    W: Write,
    S: Future<Output = ()>,
{
    tokio::pin!(interrupt);
    let mut lines = Some(input.lines());
    print_commands(out)?;

    loop {
        let line = tokio::select! {
            () = &mut interrupt => return Ok(ConsoleExit::Interrupted),
            line = next_line(lines.as_mut()) => line.context("read console input")?,
        };
        let Some(line) = line else {
            info!("console input closed; press ctrl-c to stop the backend");
            lines = None;
            continue;
        };

        match line.trim() {
            "" => {}
            "r" => {
                if let Err(err) = consumer.manual_retry() {
                    warn!("{err}");
                    return Ok(ConsoleExit::SupervisorGone);
                }
            }
            "p" => {
                let result = tokio::select! {
                    () = &mut interrupt => return Ok(ConsoleExit::Interrupted),
                    result = client.ping() => result,
                };
                match result {
                    Ok(body) => writeln!(out, "{body}")?,
                    Err(err) => writeln!(out, "ping failed: {err}")?,
                }
            }
            "s" => writeln!(out, "{}", render_status_line(&consumer.snapshot()))?,
            "l" => match log_path {
                Some(path) => writeln!(out, "{}", path_utils::display_with_tilde(path))?,
                None => writeln!(out, "logging to the console")?,
            },
            "q" => return Ok(ConsoleExit::Quit),
            other => {
                writeln!(out, "unknown command `{other}`")?;
                print_commands(out)?;
            }
        }
    }
}

async fn next_line<R>(lines: Option<&mut Lines<R>>) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ninebox_client::BackendLink;
    use ninebox_client::RetryPolicy;
    use ninebox_protocol::ConnectionConfig;
    use ninebox_protocol::ConnectionStatus;
    use ninebox_protocol::StatusUpdate;
    use ninebox_protocol::SupervisorCommand;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::sync::oneshot;
    use tokio::sync::watch;
    use tokio::time::Instant;
    use tokio::time::timeout;

    struct Harness {
        consumer: ConnectionStatusConsumer,
        client: BackendClient,
        commands: mpsc::UnboundedReceiver<SupervisorCommand>,
        _status_tx: watch::Sender<StatusUpdate>,
    }

    fn harness(initial: StatusUpdate, policy: RetryPolicy) -> Harness {
        let (status_tx, status_rx) = watch::channel(initial);
        let (command_tx, commands) = mpsc::unbounded_channel();
        let link = BackendLink::new(status_rx, command_tx);
        Harness {
            consumer: ConnectionStatusConsumer::new(link.clone()),
            client: BackendClient::new(link, policy).expect("client"),
            commands,
            _status_tx: status_tx,
        }
    }

    async fn on_signal(rx: oneshot::Receiver<()>) {
        let _ = rx.await;
    }

    #[tokio::test]
    async fn closed_input_keeps_running_until_interrupted() {
        let mut harness = harness(StatusUpdate::starting(), RetryPolicy::none());
        let (interrupt_tx, interrupt_rx) = oneshot::channel();
        let mut out = Vec::new();

        let console = run(
            &b""[..],
            &mut out,
            &harness.consumer,
            &harness.client,
            None,
            on_signal(interrupt_rx),
        );
        tokio::pin!(console);

        assert!(
            timeout(Duration::from_millis(200), &mut console)
                .await
                .is_err(),
            "closed input ended the console"
        );
        interrupt_tx.send(()).expect("console is listening");
        let exit = console.await.expect("console");

        assert_eq!(exit, ConsoleExit::Interrupted);
        assert!(matches!(
            harness.commands.try_recv(),
            Err(TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn commands_print_status_and_request_a_retry() {
        let mut harness = harness(
            StatusUpdate {
                status: ConnectionStatus::Connected,
                retry_count: 0,
                connection: Some(ConnectionConfig::loopback(51234)),
                failure: None,
            },
            RetryPolicy::none(),
        );
        let mut out = Vec::new();

        let exit = run(
            &b"s\nbogus\nr\nl\nq\ns\n"[..],
            &mut out,
            &harness.consumer,
            &harness.client,
            None,
            std::future::pending(),
        )
        .await
        .expect("console");

        assert_eq!(exit, ConsoleExit::Quit);
        let out = String::from_utf8(out).expect("utf-8 output");
        assert_eq!(out.matches("backend: connected").count(), 1);
        assert!(out.contains("backend: connected (http://127.0.0.1:51234)"));
        assert!(out.contains("unknown command `bogus`"));
        assert!(out.contains("logging to the console"));
        assert_eq!(
            harness.commands.try_recv(),
            Ok(SupervisorCommand::ManualRetry)
        );
    }

    #[tokio::test]
    async fn ping_without_a_verified_worker_reports_the_error() {
        let harness = harness(StatusUpdate::starting(), RetryPolicy::none());
        let mut out = Vec::new();

        run(
            &b"p\nq\n"[..],
            &mut out,
            &harness.consumer,
            &harness.client,
            None,
            std::future::pending(),
        )
        .await
        .expect("console");

        let out = String::from_utf8(out).expect("utf-8 output");
        assert!(out.contains("ping failed: the backend has not been verified yet"));
    }

    #[tokio::test]
    async fn interrupt_during_a_ping_is_not_lost() {
        let harness = harness(StatusUpdate::starting(), RetryPolicy::default());
        let (interrupt_tx, interrupt_rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = interrupt_tx.send(());
        });
        let mut out = Vec::new();
        let started = Instant::now();

        let exit = run(
            &b"p\n"[..],
            &mut out,
            &harness.consumer,
            &harness.client,
            None,
            on_signal(interrupt_rx),
        )
        .await
        .expect("console");

        assert_eq!(exit, ConsoleExit::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn retry_after_the_supervisor_stopped_ends_the_console() {
        let harness = harness(
            StatusUpdate {
                status: ConnectionStatus::Disconnected,
                retry_count: 0,
                connection: None,
                failure: None,
            },
            RetryPolicy::none(),
        );
        drop(harness.commands);
        let mut out = Vec::new();

        let exit = run(
            &b"r\n"[..],
            &mut out,
            &harness.consumer,
            &harness.client,
            None,
            std::future::pending(),
        )
        .await
        .expect("console");

        assert_eq!(exit, ConsoleExit::SupervisorGone);
    }
}
