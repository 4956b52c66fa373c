//! `sqldock run`: hold one database container for the length of a session.

use std::io::{self, BufRead};

use tokio::sync::mpsc;

use crate::config::Config;
use crate::docker::ContainerOrchestrator;

/// How the session is driven once the container is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Read commands from stdin: `1` toggles the container, `q` quits.
    Interactive,
    /// Hold the container until Ctrl-C.
    UntilSignal,
}

/// What a single line of stdin asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Toggle,
    Quit,
    Blank,
    Unknown(String),
}

impl Input {
    fn parse(line: &str) -> Self {
        match line.trim() {
            "1" => Input::Toggle,
            "q" | "Q" => Input::Quit,
            "" => Input::Blank,
            other => Input::Unknown(other.to_string()),
        }
    }
}

/// Start the container, drive it according to `mode`, then tear it down.
///
/// Teardown runs on every exit path, including Ctrl-C during startup.
pub async fn run_session(config: &Config, mode: RunMode) -> anyhow::Result<()> {
    let orchestrator = ContainerOrchestrator::docker(config.database.to_container_config());

    let started = {
        let start = orchestrator.start();
        tokio::select! {
            result = start => Some(result),
            _ = interrupted() => None,
        }
    };

    let connection = match started {
        Some(Ok(connection)) => connection,
        Some(Err(e)) => {
            orchestrator.stop().await;
            return Err(e.into());
        }
        None => {
            tracing::info!("Interrupted during startup");
            orchestrator.stop().await;
            return Ok(());
        }
    };

    println!("{}", connection.connection_string());

    let result = match mode {
        RunMode::Interactive => {
            println!("Press 1 to stop/start the container, q to quit.");
            match spawn_stdin_reader() {
                Ok(mut lines) => drive(&orchestrator, &mut lines, interrupted()).await,
                Err(e) => Err(e.into()),
            }
        }
        RunMode::UntilSignal => {
            hold_until(tokio::signal::ctrl_c()).await;
            Ok(())
        }
    };

    orchestrator.stop().await;
    result
}

/// Wait for `signal`. A signal that cannot be listened for ends the wait.
async fn hold_until(signal: impl Future<Output = io::Result<()>>) {
    if let Err(e) = signal.await {
        tracing::warn!(error = %e, "Cannot listen for Ctrl-C, tearing down now");
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Read stdin lines on a detached OS thread.
///
/// Stdin reads cannot be cancelled and must stay off the runtime's blocking
/// pool, or runtime shutdown waits for the next Enter.
fn spawn_stdin_reader() -> io::Result<mpsc::Receiver<io::Result<String>>> {
    let (tx, rx) = mpsc::channel(8);
    std::thread::Builder::new()
        .name("sqldock-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

/// Apply commands from `lines` until quit, end of input or `interrupt`.
async fn drive(
    orchestrator: &ContainerOrchestrator,
    lines: &mut mpsc::Receiver<io::Result<String>>,
    interrupt: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    tokio::pin!(interrupt);
    let mut running = true;

    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = &mut interrupt => {
                tracing::info!("Interrupted");
                return Ok(());
            }
        };
        let Some(line) = line.transpose()? else {
            return Ok(());
        };

        match Input::parse(&line) {
            Input::Toggle => {
                let outcome = if running {
                    orchestrator.stop_container().await
                } else {
                    orchestrator.start_container().await
                };
                match outcome {
                    Ok(true) => running = !running,
                    Ok(false) => tracing::warn!("Daemon ignored the command"),
                    Err(e) => tracing::warn!(error = %e, "Toggle failed"),
                }
                println!(
                    "Container {} (last status: {})",
                    if running { "running" } else { "stopped" },
                    orchestrator.container_status()
                );
            }
            Input::Quit => return Ok(()),
            Input::Blank => {}
            Input::Unknown(other) => {
                println!("Unknown command '{other}'. Press 1 to stop/start, q to quit.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::docker::ContainerConfig;
    use crate::testing::{RuntimeCall, ScriptedRuntime};

    fn scripted() -> (Arc<ScriptedRuntime>, ContainerOrchestrator) {
        let runtime = Arc::new(ScriptedRuntime::new());
        let config = ContainerConfig {
            settle_delay: Duration::ZERO,
            startup_timeout: Some(Duration::from_secs(5)),
            stop_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let orchestrator = ContainerOrchestrator::new(config, runtime.clone());
        (runtime, orchestrator)
    }

    #[test]
    fn test_input_parse() {
        assert_eq!(Input::parse("1\n"), Input::Toggle);
        assert_eq!(Input::parse(" q "), Input::Quit);
        assert_eq!(Input::parse(""), Input::Blank);
        assert_eq!(Input::parse("stop"), Input::Unknown("stop".to_string()));
    }

    #[tokio::test]
    async fn test_interrupt_returns_while_input_is_pending() {
        let (_runtime, orchestrator) = scripted();
        // Sender held open: no line ever arrives, as with an idle terminal.
        let (_tx, mut lines) = mpsc::channel(1);

        tokio::time::timeout(
            Duration::from_secs(1),
            drive(&orchestrator, &mut lines, async {}),
        )
        .await
        .expect("interrupt should not wait for input")
        .unwrap();
    }

    #[tokio::test]
    async fn test_hold_ends_when_signal_cannot_be_registered() {
        tokio::time::timeout(
            Duration::from_secs(1),
            hold_until(async { Err(io::Error::other("no signal driver")) }),
        )
        .await
        .expect("a failed registration should end the hold");
    }

    #[tokio::test]
    async fn test_toggle_then_quit() {
        let (runtime, orchestrator) = scripted();
        orchestrator.start().await.unwrap();

        let (tx, mut lines) = mpsc::channel(8);
        for line in ["1", "", "1", "q", "1"] {
            tx.send(Ok(line.to_string())).await.unwrap();
        }

        drive(&orchestrator, &mut lines, std::future::pending())
            .await
            .unwrap();

        let toggles: Vec<_> = runtime
            .calls()
            .into_iter()
            .filter(|call| matches!(call, RuntimeCall::Start(_) | RuntimeCall::Stop(_)))
            .collect();
        // The initial start, then one stop and one start; nothing after `q`.
        assert_eq!(toggles.len(), 3);
        assert!(matches!(toggles[1], RuntimeCall::Stop(_)));
        assert!(matches!(toggles[2], RuntimeCall::Start(_)));

        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_end_of_input_and_read_errors() {
        let (_runtime, orchestrator) = scripted();

        let (tx, mut lines) = mpsc::channel::<io::Result<String>>(1);
        drop(tx);
        drive(&orchestrator, &mut lines, std::future::pending())
            .await
            .unwrap();

        let (tx, mut lines) = mpsc::channel(1);
        tx.send(Err(io::Error::other("tty gone"))).await.unwrap();
        assert!(
            drive(&orchestrator, &mut lines, std::future::pending())
                .await
                .is_err()
        );
    }
}
