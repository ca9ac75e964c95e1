//! Shared configuration fixture for integration tests.

use hetzner_volume_driver::DriverConfig;
use hetzner_volume_driver::config::{DEFAULT_API_ENDPOINT, DEFAULT_MOUNT_ROOT, DEFAULT_SOCKET_PATH};

/// A configuration that passes validation.
pub fn valid_config() -> DriverConfig {
    DriverConfig {
        api_token: String::from("hcloud-token-example"),
        api_endpoint: DEFAULT_API_ENDPOINT.to_owned(),
        name_prefix: String::from("docker"),
        default_size_gb: None,
        default_fstype: String::from("ext4"),
        default_uid: 0,
        default_gid: 0,
        use_protection: false,
        socket_path: DEFAULT_SOCKET_PATH.to_owned(),
        mount_root: DEFAULT_MOUNT_ROOT.to_owned(),
        poll_interval_ms: 500,
        action_timeout_secs: None,
        log_level: String::from("info"),
        log_json: false,
    }
}
