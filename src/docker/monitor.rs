//! Background task feeding daemon events into the status broadcasters.
//!
//! ```text
//!   EventReader ──► decode_records ──► classify ──► StatusBroadcaster<ContainerStatus>
//!                                               └─► StatusBroadcaster<NetworkStatus>
//! ```
//!
//! The daemon reports events for every container it runs. Only events about
//! the session's own container reach the container broadcaster; the rest are
//! logged at trace level and dropped.
//!
//! The task ends when the stream ends, the stream fails, or the
//! cancellation token fires. Read failures are logged and not retried.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::docker::broadcaster::StatusBroadcaster;
use crate::docker::decoder::{RawEventRecord, decode_records};
use crate::docker::event::{ClassifiedEvent, ContainerStatus, NetworkStatus, classify};
use crate::docker::runtime::EventReader;

/// Spawn the monitor over `reader`, publishing `container`'s events into the
/// given broadcasters.
pub fn spawn_event_monitor(
    reader: EventReader,
    container: String,
    cancel: CancellationToken,
    containers: Arc<StatusBroadcaster<ContainerStatus>>,
    networks: Arc<StatusBroadcaster<NetworkStatus>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(container = %container, "Docker event monitor started");

        let records = decode_records(reader, cancel.clone());
        tokio::pin!(records);

        while let Some(next) = records.next().await {
            match next {
                Ok(record) => dispatch(&record, &container, &containers, &networks),
                Err(e) => {
                    if !cancel.is_cancelled() {
                        tracing::error!(error = %e, "Docker event stream failed, monitoring stopped");
                    }
                    break;
                }
            }
        }

        tracing::debug!(cancelled = cancel.is_cancelled(), "Docker event monitor exited");
    })
}

/// Classify one record and publish its status.
///
/// Container events about any container other than `container` are dropped.
pub fn dispatch(
    record: &RawEventRecord,
    container: &str,
    containers: &StatusBroadcaster<ContainerStatus>,
    networks: &StatusBroadcaster<NetworkStatus>,
) {
    match classify(record) {
        Ok(ClassifiedEvent::Container { event, .. }) if !event.is_for(container) => {
            tracing::trace!(
                container = event.container_name().unwrap_or_default(),
                action = event.action(),
                "Ignoring event for another container"
            );
        }
        Ok(ClassifiedEvent::Container { event, status }) => {
            tracing::debug!(
                time = ?event.timestamp(),
                image = event.image().unwrap_or_default(),
                container = event.container_name().unwrap_or_default(),
                action = event.action(),
                status = %status,
                "[Docker][Container]"
            );
            containers.push(status);
        }
        Ok(ClassifiedEvent::Network { event, status }) => {
            tracing::debug!(
                time = ?event.timestamp(),
                action = event.action(),
                status = %status,
                "[Docker][Network]"
            );
            networks.push(status);
        }
        Err(e) => {
            tracing::debug!(error = %e, record = %record, "Dropping Docker event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn broadcasters() -> (
        Arc<StatusBroadcaster<ContainerStatus>>,
        Arc<StatusBroadcaster<NetworkStatus>>,
    ) {
        (
            Arc::new(StatusBroadcaster::new()),
            Arc::new(StatusBroadcaster::new()),
        )
    }

    const NAME: &str = "sqlserver-1";

    fn container_record(name: &str, action: &str) -> RawEventRecord {
        RawEventRecord::new(format!(
            r#"{{"Type":"container","Action":"{action}","Actor":{{"ID":"id-{name}","Attributes":{{"name":"{name}"}}}}}}"#
        ))
    }

    #[test]
    fn test_dispatch_routes_by_kind() {
        let (containers, networks) = broadcasters();

        dispatch(&container_record(NAME, "create"), NAME, &containers, &networks);
        dispatch(
            &RawEventRecord::new(r#"{"Type":"network","Action":"connect"}"#),
            NAME,
            &containers,
            &networks,
        );

        assert_eq!(containers.current(), ContainerStatus::CREATE);
        assert_eq!(networks.current(), NetworkStatus::CONNECT);
    }

    #[test]
    fn test_dispatch_drops_bad_records_without_touching_status() {
        let (containers, networks) = broadcasters();
        containers.push(ContainerStatus::START);

        dispatch(&RawEventRecord::new(r#"{"Type":"volume"}"#), NAME, &containers, &networks);
        dispatch(&RawEventRecord::new("{garbage}"), NAME, &containers, &networks);

        assert_eq!(containers.current(), ContainerStatus::START);
        assert_eq!(networks.current(), NetworkStatus::NONE);
    }

    #[test]
    fn test_unknown_action_resolves_to_none() {
        let (containers, networks) = broadcasters();
        containers.push(ContainerStatus::START);

        dispatch(&container_record(NAME, "frobnicate"), NAME, &containers, &networks);

        assert_eq!(containers.current(), ContainerStatus::NONE);
    }

    #[test]
    fn test_dispatch_ignores_other_containers() {
        let (containers, networks) = broadcasters();
        containers.push(ContainerStatus::START);

        dispatch(&container_record("ci-runner", "exec_start: sh"), NAME, &containers, &networks);
        dispatch(
            &RawEventRecord::new(r#"{"Type":"container","Action":"destroy"}"#),
            NAME,
            &containers,
            &networks,
        );

        assert_eq!(containers.current(), ContainerStatus::START);
    }

    #[tokio::test]
    async fn test_monitor_publishes_and_stops_on_cancel() {
        let (containers, networks) = broadcasters();
        let (mut writer, reader) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();

        let handle = spawn_event_monitor(
            Box::pin(reader),
            NAME.to_string(),
            cancel.clone(),
            Arc::clone(&containers),
            Arc::clone(&networks),
        );

        writer
            .write_all(container_record(NAME, "start").as_str().as_bytes())
            .await
            .unwrap();

        containers
            .wait_for(
                ContainerStatus::START,
                crate::docker::WaitOptions::unbounded().with_timeout(Duration::from_secs(1)),
            )
            .await
            .unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor should exit after cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn test_monitor_exits_at_end_of_stream() {
        let (containers, networks) = broadcasters();
        let input: &'static [u8] =
            b"{\"Type\":\"container\",\"Action\":\"die\",\"id\":\"sqlserver-1\"}{\"Type\":";

        let handle = spawn_event_monitor(
            Box::pin(input),
            NAME.to_string(),
            CancellationToken::new(),
            Arc::clone(&containers),
            networks,
        );

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(containers.current(), ContainerStatus::DIE);
    }
}
