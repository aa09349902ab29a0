//! Storage-class parameter parsing, defaulting, and timeout clamping.

use std::collections::HashMap;

use chrono::Duration as ChronoDuration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::types::{clamp_migration_timeout, MIGRATION_TIMEOUT_DEFAULT};

/// Default backing pool path when `volumePath` is not set.
pub const DEFAULT_VOLUME_PATH: &str = "/storage-pool/metal-csi";
/// Default NVMe-oF target port when `nvmePort` is not set.
pub const DEFAULT_NVME_PORT: u16 = 4420;
/// Default filesystem type when `fsType` is not set.
pub const DEFAULT_FS_TYPE: &str = "ext4";
/// Default `ctrlLossTmo` (seconds, `-1` means "retry forever").
pub const DEFAULT_CTRL_LOSS_TMO: i64 = -1;
/// Default `reconnectDelay` in seconds.
pub const DEFAULT_RECONNECT_DELAY: i64 = 5;
/// Default `keepAliveTmo` in seconds.
pub const DEFAULT_KEEP_ALIVE_TMO: i64 = 0;
/// Default Btrfs filesystem label.
pub const DEFAULT_BTRFS_FS_LABEL: &str = "storage-pool";

/// NVMe-oF reconnect tuning, echoed back in the publish context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectTuning {
    /// `ctrl_loss_tmo`: seconds to keep retrying before giving up, `-1` = forever.
    pub ctrl_loss_tmo: i64,
    /// `reconnect_delay`: seconds between reconnect attempts.
    pub reconnect_delay: i64,
    /// `keep_alive_tmo`: seconds before a missed keepalive is treated as a loss.
    pub keep_alive_tmo: i64,
}

/// Fully resolved, validated storage-class parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedParams {
    /// The backing pool's base path.
    pub volume_path: String,
    /// The NVMe-oF target port.
    pub nvme_port: u16,
    /// The NVMe-oF target address: `nvmeAddress` if the storage class set
    /// it, otherwise the backend's own address.
    pub nvme_address: String,
    /// The filesystem type for filesystem-mode volumes.
    pub fs_type: String,
    /// NVMe reconnect tuning.
    pub reconnect: ReconnectTuning,
    /// The clamped migration timeout.
    pub migration_timeout: ChronoDuration,
    /// The Btrfs filesystem label, used only when `fs_type == "btrfs"`.
    pub btrfs_fs_label: String,
}

fn parse_i64(params: &HashMap<String, String>, key: &str, default: i64) -> Result<i64> {
    match params.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<i64>().map_err(|_| Error::InvalidParameter {
            key: key.to_string(),
            value: raw.clone(),
            reason: "not an integer".to_string(),
        }),
    }
}

/// Parses and validates a storage-class parameter map, applying defaults
/// for anything absent. Unknown keys are ignored. Returns
/// `Error::InvalidParameter` for malformed connection-tuning values;
/// `migrationTimeoutSeconds` is clamped rather than rejected.
pub fn resolve(params: &HashMap<String, String>, backend_address: &str) -> Result<ResolvedParams> {
    let volume_path = params
        .get("volumePath")
        .cloned()
        .unwrap_or_else(|| DEFAULT_VOLUME_PATH.to_string());

    let nvme_port = match params.get("nvmePort") {
        None => DEFAULT_NVME_PORT,
        Some(raw) => raw.trim().parse::<u16>().map_err(|_| Error::InvalidParameter {
            key: "nvmePort".to_string(),
            value: raw.clone(),
            reason: "not a valid port number".to_string(),
        })?,
    };

    let nvme_address = params
        .get("nvmeAddress")
        .cloned()
        .unwrap_or_else(|| backend_address.to_string());

    let fs_type = params
        .get("fsType")
        .cloned()
        .unwrap_or_else(|| DEFAULT_FS_TYPE.to_string());

    let ctrl_loss_tmo = parse_i64(params, "ctrlLossTmo", DEFAULT_CTRL_LOSS_TMO)?;
    if ctrl_loss_tmo < -1 {
        return Err(Error::InvalidParameter {
            key: "ctrlLossTmo".to_string(),
            value: ctrl_loss_tmo.to_string(),
            reason: "must be >= -1".to_string(),
        });
    }

    let reconnect_delay = parse_i64(params, "reconnectDelay", DEFAULT_RECONNECT_DELAY)?;
    if reconnect_delay < 1 {
        return Err(Error::InvalidParameter {
            key: "reconnectDelay".to_string(),
            value: reconnect_delay.to_string(),
            reason: "must be >= 1".to_string(),
        });
    }

    let keep_alive_tmo = parse_i64(params, "keepAliveTmo", DEFAULT_KEEP_ALIVE_TMO)?;
    if keep_alive_tmo < 0 {
        return Err(Error::InvalidParameter {
            key: "keepAliveTmo".to_string(),
            value: keep_alive_tmo.to_string(),
            reason: "must be >= 0".to_string(),
        });
    }

    let migration_timeout = match params.get("migrationTimeoutSeconds") {
        None => MIGRATION_TIMEOUT_DEFAULT,
        Some(raw) => match raw.trim().parse::<i64>() {
            Ok(secs) if secs > 0 => clamp_migration_timeout(ChronoDuration::seconds(secs)),
            _ => {
                warn!(
                    value = %raw,
                    "migrationTimeoutSeconds is non-numeric or non-positive; falling back to default"
                );
                MIGRATION_TIMEOUT_DEFAULT
            }
        },
    };

    let btrfs_fs_label = params
        .get("btrfsFSLabel")
        .cloned()
        .unwrap_or_else(|| DEFAULT_BTRFS_FS_LABEL.to_string());

    Ok(ResolvedParams {
        volume_path,
        nvme_port,
        nvme_address,
        fs_type,
        reconnect: ReconnectTuning {
            ctrl_loss_tmo,
            reconnect_delay,
            keep_alive_tmo,
        },
        migration_timeout,
        btrfs_fs_label,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_apply_when_params_empty() {
        let resolved = resolve(&HashMap::new(), "10.0.0.1").expect("resolve");
        assert_eq!(resolved.volume_path, DEFAULT_VOLUME_PATH);
        assert_eq!(resolved.nvme_port, DEFAULT_NVME_PORT);
        assert_eq!(resolved.fs_type, DEFAULT_FS_TYPE);
        assert_eq!(resolved.reconnect.ctrl_loss_tmo, -1);
        assert_eq!(resolved.migration_timeout, MIGRATION_TIMEOUT_DEFAULT);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let params = map(&[("totallyUnknown", "value")]);
        assert!(resolve(&params, "10.0.0.1").is_ok());
    }

    #[test]
    fn rejects_invalid_ctrl_loss_tmo() {
        let params = map(&[("ctrlLossTmo", "-5")]);
        assert!(resolve(&params, "10.0.0.1").is_err());
    }

    #[test]
    fn rejects_invalid_reconnect_delay() {
        let params = map(&[("reconnectDelay", "0")]);
        assert!(resolve(&params, "10.0.0.1").is_err());
    }

    #[test]
    fn rejects_negative_keep_alive_tmo() {
        let params = map(&[("keepAliveTmo", "-1")]);
        assert!(resolve(&params, "10.0.0.1").is_err());
    }

    #[test_case("10", 30; "below minimum clamps")]
    #[test_case("300", 300; "default value passes through")]
    #[test_case("7200", 3600; "above maximum clamps")]
    fn migration_timeout_clamped(raw: &str, expected_secs: i64) {
        let params = map(&[("migrationTimeoutSeconds", raw)]);
        let resolved = resolve(&params, "10.0.0.1").expect("resolve");
        assert_eq!(resolved.migration_timeout, ChronoDuration::seconds(expected_secs));
    }

    #[test]
    fn non_numeric_migration_timeout_falls_back_to_default() {
        let params = map(&[("migrationTimeoutSeconds", "not-a-number")]);
        let resolved = resolve(&params, "10.0.0.1").expect("resolve");
        assert_eq!(resolved.migration_timeout, MIGRATION_TIMEOUT_DEFAULT);
    }

    #[test]
    fn non_positive_migration_timeout_falls_back_to_default() {
        let params = map(&[("migrationTimeoutSeconds", "-10")]);
        let resolved = resolve(&params, "10.0.0.1").expect("resolve");
        assert_eq!(resolved.migration_timeout, MIGRATION_TIMEOUT_DEFAULT);
    }

    #[test]
    fn nvme_address_falls_back_to_backend_address_when_absent() {
        let resolved = resolve(&HashMap::new(), "10.0.0.1").expect("resolve");
        assert_eq!(resolved.nvme_address, "10.0.0.1");
    }

    #[test]
    fn nvme_address_param_overrides_backend_address() {
        let params = map(&[("nvmeAddress", "10.0.0.99")]);
        let resolved = resolve(&params, "10.0.0.1").expect("resolve");
        assert_eq!(resolved.nvme_address, "10.0.0.99");
    }
}
