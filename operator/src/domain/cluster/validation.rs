use tracing::warn;

use crate::domain::{
    cluster::entities::{ClusterSpec, ClusterStatus, DbType, RawClusterSpec, Tuning, WorkloadSpec},
    common::ImageDefaults,
    error::OperatorError,
};

pub const MAX_REPLICAS: i32 = 32;
pub const DEFAULT_REPLICAS: i32 = 1;
pub const DEFAULT_LOG_LEVEL: &str = "info";

const QUANTITY_SUFFIXES: [&str; 13] = [
    "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "k", "M", "G", "T", "P", "E", "m",
];

/// Applies declared defaults and checks every field the reconciler depends on.
///
/// Pure: a failure here must leave live members untouched, so callers only surface
/// the error as a condition.
pub fn validate_spec(
    raw: &RawClusterSpec,
    images: &ImageDefaults,
) -> Result<ClusterSpec, OperatorError> {
    let db_type: DbType = raw.db_type.parse()?;

    let replicas = raw.replicas.unwrap_or(DEFAULT_REPLICAS);
    if !(0..=MAX_REPLICAS).contains(&replicas) {
        return Err(OperatorError::InvalidSpec {
            field: "replicas",
            message: format!("must be within 0..={MAX_REPLICAS}, got {replicas}"),
        });
    }

    let defaults = Tuning::default();
    let tuning = Tuning {
        election_timer: positive_millis(
            "electionTimer",
            raw.election_timer,
            defaults.election_timer,
        )?,
        inactivity_probe: positive_millis(
            "inactivityProbe",
            raw.inactivity_probe,
            defaults.inactivity_probe,
        )?,
        probe_interval_to_active: positive_millis(
            "probeIntervalToActive",
            raw.probe_interval_to_active,
            defaults.probe_interval_to_active,
        )?,
    };
    if tuning.election_timer >= tuning.inactivity_probe {
        warn!(
            election_timer = tuning.election_timer,
            inactivity_probe = tuning.inactivity_probe,
            "election timer is not smaller than the inactivity probe, elections may trigger spuriously"
        );
    }

    let container_image = if raw.container_image.trim().is_empty() {
        images.for_db_type(db_type).to_string()
    } else {
        raw.container_image.trim().to_string()
    };
    if container_image.is_empty() {
        return Err(OperatorError::InvalidSpec {
            field: "containerImage",
            message: "must not be empty".to_string(),
        });
    }

    validate_quantity(&raw.storage_request)?;

    let network_attachment = match raw.network_attachment.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(name) => {
            validate_attachment_name(name)?;
            Some(name.to_string())
        }
    };

    let storage_class = raw
        .storage_class
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let log_level = raw
        .log_level
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_LOG_LEVEL)
        .to_string();

    Ok(ClusterSpec {
        db_type,
        replicas: replicas as u32,
        tuning,
        workload: WorkloadSpec {
            container_image,
            resources: raw.resources.clone(),
            storage_class,
            storage_request: raw.storage_request.trim().to_string(),
            node_selector: raw.node_selector.clone(),
            network_attachment,
            log_level,
            debug: raw.debug,
        },
    })
}

/// A cluster keeps the database type it was first reconciled with.
pub fn ensure_db_type_unchanged(
    spec: &ClusterSpec,
    status: &ClusterStatus,
) -> Result<(), OperatorError> {
    match status.db_type {
        Some(recorded) if recorded != spec.db_type => Err(OperatorError::InvalidSpec {
            field: "dbType",
            message: format!(
                "is immutable, cluster was created as {recorded}, got {}",
                spec.db_type
            ),
        }),
        _ => Ok(()),
    }
}

fn positive_millis(
    field: &'static str,
    value: Option<i32>,
    default: u32,
) -> Result<u32, OperatorError> {
    match value {
        None => Ok(default),
        Some(v) if v > 0 => Ok(v as u32),
        Some(v) => Err(OperatorError::InvalidSpec {
            field,
            message: format!("must be a positive number of milliseconds, got {v}"),
        }),
    }
}

/// Accepts Kubernetes-style quantities such as `10G`, `500Mi` or `1.5Gi`, strictly positive.
fn validate_quantity(raw: &str) -> Result<(), OperatorError> {
    let invalid = |message: String| OperatorError::InvalidSpec {
        field: "storageRequest",
        message,
    };

    let value = raw.trim();
    if value.is_empty() {
        return Err(invalid("must not be empty".to_string()));
    }

    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(split);

    if !suffix.is_empty() && !QUANTITY_SUFFIXES.contains(&suffix) {
        return Err(invalid(format!("unknown unit {suffix:?} in {value:?}")));
    }
    let amount: f64 = number
        .parse()
        .map_err(|_| invalid(format!("{value:?} is not a quantity")))?;
    if amount <= 0.0 {
        return Err(invalid(format!("{value:?} must be positive")));
    }
    Ok(())
}

/// `name` or `namespace/name`, each part a DNS-1123 name.
fn validate_attachment_name(name: &str) -> Result<(), OperatorError> {
    let invalid = || OperatorError::InvalidSpec {
        field: "networkAttachment",
        message: format!("{name:?} is not a valid network attachment name"),
    };

    let (namespace, object) = match name.split_once('/') {
        Some((ns, obj)) => (Some(ns), obj),
        None => (None, name),
    };
    if namespace.is_some_and(|ns| ns.len() > 63 || ns.contains('.') || !is_dns1123(ns)) {
        return Err(invalid());
    }
    if object.len() > 253 || !is_dns1123(object) {
        return Err(invalid());
    }
    Ok(())
}

fn is_dns1123(s: &str) -> bool {
    let bytes = s.as_bytes();
    let edge_ok = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    !bytes.is_empty()
        && bytes.first().is_some_and(edge_ok)
        && bytes.last().is_some_and(edge_ok)
        && bytes
            .iter()
            .all(|b| edge_ok(b) || *b == b'-' || *b == b'.')
}
