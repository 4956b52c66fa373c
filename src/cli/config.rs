//! `sqldock config`: print the resolved settings.

use std::fmt::Write as _;

use crate::config::Config;

/// Render the resolved configuration, one `KEY=value` per line.
///
/// The SA password is always redacted.
pub fn show_config(config: &Config) -> String {
    let db = &config.database;
    let mut out = String::new();
    let rows: [(&str, String); 12] = [
        ("SQLDOCK_IMAGE", db.image.clone()),
        ("SQLDOCK_IMAGE_TAG", db.image_tag.clone()),
        ("SQLDOCK_CONTAINER_PREFIX", db.container_prefix.clone()),
        ("SQLDOCK_PORT_MIN", db.port_min.to_string()),
        ("SQLDOCK_PORT_MAX", db.port_max.to_string()),
        ("SQLDOCK_SA_PASSWORD", "***".to_string()),
        ("SQLDOCK_DATABASE", db.database.clone()),
        ("SQLDOCK_READY_STATUS", db.ready_status.to_string()),
        ("SQLDOCK_SETTLE_DELAY_SECS", db.settle_delay_secs.to_string()),
        ("SQLDOCK_STARTUP_TIMEOUT_SECS", db.startup_timeout_secs.to_string()),
        ("SQLDOCK_STOP_TIMEOUT_SECS", db.stop_timeout_secs.to_string()),
        ("SQLDOCK_WAIT_TIMEOUT_SECS", db.wait_timeout_secs.to_string()),
    ];
    for (key, value) in rows {
        let _ = writeln!(out, "{key}={value}");
    }
    out
}
