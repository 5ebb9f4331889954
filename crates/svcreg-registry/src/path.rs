//! Namespace layout: `/services/<service>/<protocol>/<sequential-child>`.

use svcreg_coord::{CreateMode, Session};
use svcreg_core::{AclPolicy, CoordResult, RegistryError};

/// Top-level node under which every service lives
pub const SERVICES_ROOT: &str = "services";

/// Path segments for a (service, protocol) pair
pub fn path_parts<'a>(service: &'a str, protocol: &'a str) -> [&'a str; 3] {
    [SERVICES_ROOT, service, protocol]
}

/// Joins segments into an absolute path
pub fn build_path(parts: &[&str]) -> String {
    if parts.is_empty() {
        return "/".to_string();
    }

    parts.iter().fold(String::new(), |mut path, part| {
        path.push('/');
        path.push_str(part);
        path
    })
}

/// Creates every missing prefix of `parts` as a persistent node.
///
/// Nodes that already exist, including ones created concurrently by another
/// client, count as success.
pub async fn ensure_path(session: &dyn Session, parts: &[&str], acl: AclPolicy) -> CoordResult<()> {
    let mut path = String::new();

    for part in parts {
        path.push('/');
        path.push_str(part);

        match session.create(&path, &[], CreateMode::Persistent, acl).await {
            Ok(_) => {}
            Err(e) if e.is_node_exists() => {}
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Checks that a service or protocol name is usable as a single path segment
pub fn validate_segment(kind: &'static str, name: &str) -> Result<(), RegistryError> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.contains('/') {
        "must not contain '/'"
    } else if name == "." || name == ".." {
        "must not be a relative path component"
    } else {
        return Ok(());
    };

    Err(RegistryError::InvalidName {
        kind,
        name: name.to_string(),
        reason,
    })
}
