use crate::backend::IdentityDatabase;
use crate::error::{DaemonError, DaemonResult};

/// The numeric identity the service should switch to, if any.
///
/// Either both IDs are set or neither is; a value of zero for both means
/// "no identity change".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceIdentity {
    ids: Option<(u32, u32)>,
}

impl ServiceIdentity {
    pub fn unchanged() -> Self {
        ServiceIdentity { ids: None }
    }

    pub fn uid(&self) -> Option<u32> {
        self.ids.map(|(uid, _)| uid)
    }

    pub fn gid(&self) -> Option<u32> {
        self.ids.map(|(_, gid)| gid)
    }

    /// The `(uid, gid)` pair to drop to, present only for a real (non-root) switch.
    pub fn target(&self) -> Option<(u32, u32)> {
        self.ids
    }

    /// Resolves the textual `uid`/`gid` options.
    ///
    /// A missing GID is backfilled from the primary group of the UID; a GID
    /// without a UID is rejected.
    pub fn resolve(uid: &str, gid: &str, db: &dyn IdentityDatabase) -> DaemonResult<Self> {
        let (uid, gid) = match (uid.is_empty(), gid.is_empty()) {
            (true, true) => return Ok(Self::unchanged()),
            (true, false) => {
                return Err(DaemonError::Configuration(
                    "GID without UID is not a valid partial specification".into(),
                ))
            }
            (false, true) => {
                let uid = parse_uid(uid)?;
                (uid, db.primary_gid(uid)?)
            }
            (false, false) => (parse_uid(uid)?, parse_gid(gid)?),
        };

        if (uid == 0) != (gid == 0) {
            return Err(DaemonError::Configuration(
                "Either both or neither of the UID and GID must be positive".into(),
            ));
        }
        if uid == 0 {
            return Ok(Self::unchanged());
        }
        Ok(ServiceIdentity { ids: Some((uid, gid)) })
    }
}

pub fn parse_uid(text: &str) -> DaemonResult<u32> {
    parse_id("UID", text)
}

pub fn parse_gid(text: &str) -> DaemonResult<u32> {
    parse_id("GID", text)
}

fn parse_id(kind: &str, text: &str) -> DaemonResult<u32> {
    // (uid_t)-1 means "leave unchanged" to set*id(2), never a real identity.
    match text.parse::<u32>() {
        Ok(id) if id != u32::MAX => Ok(id),
        _ => Err(DaemonError::Parse(format!("invalid {}: {:?}", kind, text))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubIdentity;

    #[test]
    fn empty_means_unchanged() {
        let id = ServiceIdentity::resolve("", "", &StubIdentity::default()).unwrap();
        assert_eq!(id, ServiceIdentity::unchanged());
        assert_eq!(id.uid(), None);
    }

    #[test]
    fn gid_is_backfilled_from_uid() {
        let db = StubIdentity::with(1000, 1000);
        let id = ServiceIdentity::resolve("1000", "", &db).unwrap();
        assert_eq!(id.target(), Some((1000, 1000)));
    }

    #[test]
    fn unknown_uid_fails_lookup() {
        let err = ServiceIdentity::resolve("4242", "", &StubIdentity::default()).unwrap_err();
        assert!(matches!(err, DaemonError::IdentityLookup(_)));
    }

    #[test]
    fn gid_alone_is_a_configuration_error() {
        let err = ServiceIdentity::resolve("", "50", &StubIdentity::default()).unwrap_err();
        assert!(matches!(err, DaemonError::Configuration(_)));
    }

    #[test]
    fn non_numeric_ids_fail_to_parse() {
        let db = StubIdentity::default();
        assert!(matches!(ServiceIdentity::resolve("nobody", "1", &db), Err(DaemonError::Parse(_))));
        assert!(matches!(ServiceIdentity::resolve("1", "-5", &db), Err(DaemonError::Parse(_))));
        assert!(matches!(parse_gid("4294967295"), Err(DaemonError::Parse(_))));
        assert!(matches!(parse_uid("99999999999"), Err(DaemonError::Parse(_))));
    }

    #[test]
    fn root_pair_is_unchanged_but_half_root_is_rejected() {
        let db = StubIdentity::default();
        assert_eq!(ServiceIdentity::resolve("0", "0", &db).unwrap().target(), None);
        assert!(matches!(
            ServiceIdentity::resolve("1000", "0", &db),
            Err(DaemonError::Configuration(_))
        ));
        assert!(matches!(
            ServiceIdentity::resolve("0", "1000", &db),
            Err(DaemonError::Configuration(_))
        ));
    }
}
